//! Structured command adapter.
//!
//! Translates tagged JSON commands into [`VectorEngine`] calls and wraps
//! every outcome in a uniform response envelope, so transports (CLI,
//! RPC, tests) share one dispatch path.
//!
//! # Request Format
//!
//! Commands are internally tagged JSON objects:
//!
//! ```json
//! { "type": "upsert", "embeddings": [[0.1, 0.2]] }
//! { "type": "search", "embedding": [0.1, 0.2], "max_results": 5 }
//! { "type": "count" }
//! { "type": "delete", "ids": [0, 3] }
//! ```
//!
//! Every response carries `success`, optional `data`, and an optional
//! `error` string. A response is never both.

use crate::engine::VectorEngine;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Result rows returned when `max_results` is omitted.
const DEFAULT_MAX_RESULTS: usize = 10;

/// A structured request against the vector engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VectorCommand {
    /// Store one or more embeddings under a caller-supplied key.
    Upsert {
        /// Caller's correlation key; generated when omitted.
        #[serde(default)]
        id: Option<Uuid>,
        /// The embeddings to store.
        embeddings: Vec<Vec<f32>>,
    },

    /// Nearest-neighbor search for a single query embedding.
    Search {
        /// Caller's correlation key, echoed back in the response.
        #[serde(default)]
        uuid: Option<Uuid>,
        /// The query embedding.
        embedding: Vec<f32>,
        /// Maximum matches to return (default 10).
        #[serde(default)]
        max_results: Option<usize>,
        /// Minimum similarity score; matches below it are dropped.
        #[serde(default)]
        min_score: Option<f32>,
    },

    /// Report how many vectors the index holds.
    Count {},

    /// Remove vectors by numeric id.
    Delete {
        /// The ids to remove.
        ids: Vec<u64>,
    },
}

/// Uniform response envelope for every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the command succeeded.
    pub success: bool,

    /// Command-specific payload (if successful, or partial detail).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    /// Creates a successful response.
    #[must_use]
    pub const fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub const fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Creates a failed response that still carries detail, such as the
    /// surviving half of a partial batch.
    #[must_use]
    pub const fn failure_with_data(error: String, data: Value) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error),
        }
    }
}

/// Dispatches [`VectorCommand`]s against one engine.
#[derive(Clone)]
pub struct CommandHandler {
    engine: VectorEngine,
}

impl CommandHandler {
    /// Creates a handler over the given engine.
    #[must_use]
    pub const fn new(engine: VectorEngine) -> Self {
        Self { engine }
    }

    /// Parses a raw JSON command and executes it.
    ///
    /// Parse failures come back as a failure envelope, never a panic or
    /// a transport-level error.
    pub async fn handle_json(&self, raw: &str) -> CommandResponse {
        match serde_json::from_str::<VectorCommand>(raw) {
            Ok(command) => self.handle(command).await,
            Err(e) => CommandResponse::failure(
                Error::InvalidInput(format!("bad command: {e}")).to_string(),
            ),
        }
    }

    /// Executes a command and wraps the outcome in an envelope.
    #[instrument(skip(self, command))]
    pub async fn handle(&self, command: VectorCommand) -> CommandResponse {
        match self.execute(command).await {
            Ok(data) => CommandResponse::success(data),
            Err(Error::BatchPartial {
                operation,
                succeeded,
                failed,
            }) => CommandResponse::failure_with_data(
                format!(
                    "{operation}: {} item(s) stored, {} failed",
                    succeeded.len(),
                    failed.len()
                ),
                json!({ "succeeded": succeeded, "failed": failed }),
            ),
            Err(e) => CommandResponse::failure(e.to_string()),
        }
    }

    async fn execute(&self, command: VectorCommand) -> Result<Value> {
        match command {
            VectorCommand::Upsert { id, embeddings } => self.upsert(id, embeddings).await,
            VectorCommand::Search {
                uuid,
                embedding,
                max_results,
                min_score,
            } => self.search(uuid, embedding, max_results, min_score).await,
            VectorCommand::Count {} => {
                let count = self.engine.count()?;
                Ok(json!({ "count": count }))
            },
            VectorCommand::Delete { ids } => {
                let requested = ids.len();
                let removed = self.engine.delete_vectors(ids).await?;
                Ok(json!({ "requested": requested, "removed": removed }))
            },
        }
    }

    /// Validates each embedding on its own, stores the valid ones, and
    /// reports any rejects as a partial failure instead of silently
    /// dropping them.
    async fn upsert(&self, id: Option<Uuid>, embeddings: Vec<Vec<f32>>) -> Result<Value> {
        if embeddings.is_empty() {
            return Err(Error::InvalidInput(
                "upsert requires at least one embedding".to_string(),
            ));
        }

        let key = id.unwrap_or_else(Uuid::new_v4);
        let expected = self.engine.dimension();

        let mut valid = Vec::with_capacity(embeddings.len());
        let mut failed = Vec::new();
        for (item, embedding) in embeddings.into_iter().enumerate() {
            if embedding.len() == expected {
                valid.push(embedding);
            } else {
                failed.push(format!(
                    "embedding {item}: expected {expected} dimensions, got {}",
                    embedding.len()
                ));
            }
        }

        let assigned = if valid.is_empty() {
            Vec::new()
        } else {
            self.engine.add_vectors(valid).await?
        };

        if !failed.is_empty() {
            return Err(Error::BatchPartial {
                operation: "upsert".to_string(),
                succeeded: assigned,
                failed,
            });
        }

        debug!(key = %key, stored = assigned.len(), "upsert stored embeddings");
        Ok(json!({ "id": key, "ids": assigned, "count": assigned.len() }))
    }

    async fn search(
        &self,
        uuid: Option<Uuid>,
        embedding: Vec<f32>,
        max_results: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<Value> {
        let k = max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let rows = self.engine.search_vectors(vec![embedding], k).await?;

        let matches: Vec<Value> = rows
            .first()
            .map(|(distances, ids)| {
                distances
                    .iter()
                    .zip(ids.iter())
                    .filter(|&(_, &matched)| matched >= 0)
                    .map(|(&distance, &matched)| {
                        let score = 1.0 / (1.0 + distance);
                        json!({ "id": matched, "distance": distance, "score": score })
                    })
                    .filter(|m| {
                        min_score.is_none_or(|threshold| {
                            m["score"].as_f64().unwrap_or(0.0) >= f64::from(threshold)
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({ "uuid": uuid, "matches": matches, "count": matches.len() }))
    }
}
