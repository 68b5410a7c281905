use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::errors::HarnessError;

/// Upper bound on a single inbound line. Generated text rides inside
/// response lines, so the cap is generous; anything larger is treated as a
/// malformed peer, not a transport hiccup.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// The bidirectional message connection the harness consumes.
///
/// One text message per call in each direction; `receive_text` resolves to
/// `Ok(None)` when the peer closed the connection in an orderly way.
/// Framing, TLS and reconnection live behind implementations of this trait,
/// not in the harness.
#[async_trait]
pub trait MessageTransport: Send {
    async fn send_text(&mut self, line: String) -> Result<(), HarnessError>;

    async fn receive_text(&mut self) -> Result<Option<String>, HarnessError>;

    async fn close(&mut self) -> Result<(), HarnessError>;
}

/// Newline-delimited text messages over a TCP stream, the line-oriented
/// connection the generation service speaks.
pub struct TcpLineTransport {
    framed: Framed<TcpStream, LinesCodec>,
}

impl TcpLineTransport {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, HarnessError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "connected");

        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
        })
    }
}

#[async_trait]
impl MessageTransport for TcpLineTransport {
    async fn send_text(&mut self, line: String) -> Result<(), HarnessError> {
        self.framed.send(line).await.map_err(codec_error)
    }

    async fn receive_text(&mut self) -> Result<Option<String>, HarnessError> {
        match self.framed.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(codec_error(e)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), HarnessError> {
        // The codec encodes any AsRef<str>, so the sink item must be pinned
        // down for close.
        SinkExt::<String>::close(&mut self.framed)
            .await
            .map_err(codec_error)
    }
}

fn codec_error(error: LinesCodecError) -> HarnessError {
    match error {
        LinesCodecError::MaxLineLengthExceeded => HarnessError::protocol(format!(
            "response line exceeds {MAX_LINE_BYTES} bytes"
        )),
        // The codec reports undecodable bytes as an InvalidData io error.
        LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            HarnessError::protocol(format!("response is not valid UTF-8: {e}"))
        }
        LinesCodecError::Io(e) => HarnessError::Io(e),
    }
}
