use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::CommandClient;
use crate::errors::HarnessError;

/// The three kinds of server-side entity a session creates and owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    State,
    Sampler,
    Transformer,
}

impl EntityKind {
    pub fn create_command(self) -> &'static str {
        match self {
            EntityKind::State => "create_state",
            EntityKind::Sampler => "create_sampler",
            EntityKind::Transformer => "create_transformer",
        }
    }

    pub fn copy_command(self) -> &'static str {
        match self {
            EntityKind::State => "copy_state",
            EntityKind::Sampler => "copy_sampler",
            EntityKind::Transformer => "copy_transformer",
        }
    }

    pub fn delete_command(self) -> &'static str {
        match self {
            EntityKind::State => "delete_state",
            EntityKind::Sampler => "delete_sampler",
            EntityKind::Transformer => "delete_transformer",
        }
    }
}

/// Kind-specific policy description for samplers and transformers: a policy
/// name plus numeric parameters, passed through to the server opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub type_id: String,
    pub params: BTreeMap<String, f64>,
}

impl EntitySpec {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// An entity this session created and has not yet deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEntity {
    pub kind: EntityKind,
    pub id: String,
}

/// Session entity manager.
///
/// Issues create/delete commands for the three entity kinds and tracks the
/// ids it owns so cleanup can release them later, including after a failed
/// run. The server gives no idempotency guarantees: deleting an id twice
/// produces an error response, which is surfaced, never swallowed. Nothing
/// here retries.
pub struct SessionManager {
    client: CommandClient,
    live: Vec<LiveEntity>,
}

impl SessionManager {
    pub fn new(client: CommandClient) -> Self {
        Self {
            client,
            live: Vec::new(),
        }
    }

    /// The underlying correlation layer, for commands that are not entity
    /// lifecycle (the generation loop issues `infer` through this).
    pub fn client_mut(&mut self) -> &mut CommandClient {
        &mut self.client
    }

    /// Entities created and not yet deleted, in creation order.
    pub fn live_entities(&self) -> &[LiveEntity] {
        &self.live
    }

    pub async fn create_state(&mut self, id: &str) -> Result<(), HarnessError> {
        self.create(EntityKind::State, id, json!(id)).await
    }

    pub async fn create_sampler(&mut self, id: &str, spec: &EntitySpec) -> Result<(), HarnessError> {
        self.create(EntityKind::Sampler, id, json!({ "id": id, "data": spec }))
            .await
    }

    pub async fn create_transformer(
        &mut self,
        id: &str,
        spec: &EntitySpec,
    ) -> Result<(), HarnessError> {
        self.create(EntityKind::Transformer, id, json!({ "id": id, "data": spec }))
            .await
    }

    /// Duplicates a live state's context under a new id. The destination
    /// joins the registry like any other created state.
    pub async fn copy_state(&mut self, source: &str, destination: &str) -> Result<(), HarnessError> {
        self.copy(EntityKind::State, source, destination).await
    }

    /// Duplicates a sampler, accumulated policy state included.
    pub async fn copy_sampler(
        &mut self,
        source: &str,
        destination: &str,
    ) -> Result<(), HarnessError> {
        self.copy(EntityKind::Sampler, source, destination).await
    }

    /// Duplicates a transformer, accumulated policy state included.
    pub async fn copy_transformer(
        &mut self,
        source: &str,
        destination: &str,
    ) -> Result<(), HarnessError> {
        self.copy(EntityKind::Transformer, source, destination).await
    }

    /// Feeds tokens into the given states without sampling new ones.
    pub async fn update_state(&mut self, states: &[String], tokens: Value) -> Result<(), HarnessError> {
        self.client
            .invoke(
                "update_state",
                Some(json!({ "states": states, "tokens": tokens })),
            )
            .await
            .map(|_| ())
    }

    /// Re-arms a sampler's internal policy state.
    pub async fn reset_sampler(&mut self, id: &str) -> Result<(), HarnessError> {
        self.client
            .invoke("reset_sampler", Some(json!(id)))
            .await
            .map(|_| ())
    }

    /// Re-arms a transformer's internal policy state.
    pub async fn reset_transformer(&mut self, id: &str) -> Result<(), HarnessError> {
        self.client
            .invoke("reset_transformer", Some(json!(id)))
            .await
            .map(|_| ())
    }

    pub async fn delete_state(&mut self, id: &str) -> Result<(), HarnessError> {
        self.delete(EntityKind::State, id).await
    }

    pub async fn delete_sampler(&mut self, id: &str) -> Result<(), HarnessError> {
        self.delete(EntityKind::Sampler, id).await
    }

    pub async fn delete_transformer(&mut self, id: &str) -> Result<(), HarnessError> {
        self.delete(EntityKind::Transformer, id).await
    }

    /// Best-effort release of everything this session still owns, in
    /// reverse creation order.
    ///
    /// Every live entity is attempted even after a failure; failures are
    /// logged, the failed entities stay in the registry, and the first error
    /// is returned once all deletions have been tried.
    pub async fn cleanup(&mut self) -> Result<(), HarnessError> {
        let mut first_error = None;
        let mut remaining = Vec::new();

        while let Some(entity) = self.live.pop() {
            match self
                .client
                .invoke(entity.kind.delete_command(), Some(json!(entity.id)))
                .await
            {
                Ok(_) => {
                    debug!(kind = ?entity.kind, id = %entity.id, "released entity");
                }
                Err(error) => {
                    warn!(kind = ?entity.kind, id = %entity.id, %error, "failed to release entity");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    remaining.push(entity);
                }
            }
        }

        remaining.reverse();
        self.live = remaining;

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn create(
        &mut self,
        kind: EntityKind,
        id: &str,
        data: Value,
    ) -> Result<(), HarnessError> {
        self.client.invoke(kind.create_command(), Some(data)).await?;
        self.live.push(LiveEntity {
            kind,
            id: id.to_string(),
        });
        Ok(())
    }

    async fn copy(
        &mut self,
        kind: EntityKind,
        source: &str,
        destination: &str,
    ) -> Result<(), HarnessError> {
        self.client
            .invoke(
                kind.copy_command(),
                Some(json!({ "source": source, "destination": destination })),
            )
            .await?;
        self.live.push(LiveEntity {
            kind,
            id: destination.to_string(),
        });
        Ok(())
    }

    async fn delete(&mut self, kind: EntityKind, id: &str) -> Result<(), HarnessError> {
        self.client
            .invoke(kind.delete_command(), Some(json!(id)))
            .await?;
        self.live.retain(|e| !(e.kind == kind && e.id == id));
        Ok(())
    }
}
