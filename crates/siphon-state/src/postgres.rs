//! `PostgreSQL`-backed implementation of [`StateBackend`].
//!
//! Stores each stream's state as a single JSONB row. Uses the sync
//! `postgres` crate with a `Mutex<Client>` for thread safety; async callers
//! must go through a blocking task because the client drives its own
//! internal runtime.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use postgres::{Client, NoTls};
use siphon_types::state::{StreamKind, StreamState};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// Fixed partition key for relay-owned rows. Lets the state table be shared
/// with other tools without key collisions.
const PARTITION_KEY: &str = "forwarder";

/// Idempotent DDL for the state table (`PostgreSQL` dialect).
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS relay_state (
    partition_key TEXT NOT NULL,
    stream TEXT NOT NULL,
    state JSONB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (now()::text),
    PRIMARY KEY (partition_key, stream)
);
";

/// `PostgreSQL`-backed state storage.
///
/// Create with [`PostgresBackend::connect`] providing a libpq-style
/// connection string (e.g. `"postgresql://relay@localhost/relay"`).
pub struct PostgresBackend {
    client: Mutex<Client>,
}

impl PostgresBackend {
    /// Connect to a `PostgreSQL` database and initialize the state table.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if connection or DDL execution fails.
    pub fn connect(connstr: &str) -> error::Result<Self> {
        let mut client = Client::connect(connstr, NoTls)
            .map_err(|e| StateError::backend_context("connect", e))?;
        client
            .batch_execute(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("ensure schema", e))?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Acquire the client lock.
    fn lock_client(&self) -> error::Result<MutexGuard<'_, Client>> {
        self.client.lock().map_err(|_| StateError::LockPoisoned)
    }
}

impl StateBackend for PostgresBackend {
    fn load(&self, stream: &StreamKind) -> error::Result<Option<StreamState>> {
        let mut client = self.lock_client()?;
        let row = client
            .query_opt(
                "SELECT state FROM relay_state WHERE partition_key = $1 AND stream = $2",
                &[&PARTITION_KEY, &stream.as_str()],
            )
            .map_err(StateError::backend)?;

        match row {
            Some(row) => {
                let blob: serde_json::Value = row.get(0);
                let state = serde_json::from_value(blob)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    fn store(&self, stream: &StreamKind, state: &StreamState) -> error::Result<()> {
        let blob = serde_json::to_value(state)?;
        let now = Utc::now().to_rfc3339();
        let mut client = self.lock_client()?;
        client
            .execute(
                "INSERT INTO relay_state (partition_key, stream, state, updated_at) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (partition_key, stream) \
                 DO UPDATE SET state = $3, updated_at = $4",
                &[&PARTITION_KEY, &stream.as_str(), &blob, &now],
            )
            .map_err(StateError::backend)?;
        Ok(())
    }

    fn delete(&self, stream: &StreamKind) -> error::Result<()> {
        let mut client = self.lock_client()?;
        client
            .execute(
                "DELETE FROM relay_state WHERE partition_key = $1 AND stream = $2",
                &[&PARTITION_KEY, &stream.as_str()],
            )
            .map_err(StateError::backend)?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
