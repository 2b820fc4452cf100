//! StateStore — redb-backed persistence for the Skyward decision core.
//!
//! Holds validated policies, the per-app active-schedule record, and the
//! emitted scale actions. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use skyward_core::policy::ScalingPolicy;
use skyward_core::{ActiveSchedule, AppId, ScaleAction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::records::{ActiveScheduleRecord, CasOutcome};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(ACTIVE_SCHEDULES).map_err(map_err!(Table))?;
        txn.open_table(SCALE_ACTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or replace the policy for an app.
    pub fn put_policy(&self, app_id: &str, policy: &ScalingPolicy) -> StateResult<()> {
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            table
                .insert(app_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, "policy stored");
        Ok(())
    }

    /// Get the policy for an app.
    pub fn get_policy(&self, app_id: &str) -> StateResult<Option<ScalingPolicy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        match table.get(app_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let policy: ScalingPolicy =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    /// List all stored policies with their app ids.
    pub fn list_policies(&self) -> StateResult<Vec<(AppId, ScalingPolicy)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let policy: ScalingPolicy =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), policy));
        }
        Ok(results)
    }

    /// Delete an app's policy and its active-schedule record. Returns true
    /// if the policy existed.
    pub fn delete_policy(&self, app_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut policies = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            existed = policies.remove(app_id).map_err(map_err!(Write))?.is_some();
            let mut schedules = txn.open_table(ACTIVE_SCHEDULES).map_err(map_err!(Table))?;
            schedules.remove(app_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, existed, "policy deleted");
        Ok(existed)
    }

    // ── Active schedules ───────────────────────────────────────────

    /// Get the active-schedule record for an app.
    pub fn get_active_schedule(&self, app_id: &str) -> StateResult<Option<ActiveScheduleRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVE_SCHEDULES).map_err(map_err!(Table))?;
        match table.get(app_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ActiveScheduleRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Compare-and-swap the active-schedule record for an app.
    ///
    /// `expected` is the generation the caller last read (`None` for "no
    /// record yet"). On match the new record commits with a bumped
    /// generation; on mismatch nothing is written and the actual stored
    /// record comes back. redb serializes write transactions, which makes
    /// the read-compare-write below atomic.
    pub fn compare_and_swap_active_schedule(
        &self,
        app_id: &str,
        expected: Option<u64>,
        next: Option<&ActiveSchedule>,
    ) -> StateResult<CasOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(ACTIVE_SCHEDULES).map_err(map_err!(Table))?;
            let current: Option<ActiveScheduleRecord> = match table
                .get(app_id)
                .map_err(map_err!(Read))?
            {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            if current.as_ref().map(|r| r.generation) != expected {
                outcome = CasOutcome::Conflict(current);
            } else {
                let generation = expected.unwrap_or(0) + 1;
                let record = ActiveScheduleRecord { generation, schedule: next.cloned() };
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(app_id, value.as_slice())
                    .map_err(map_err!(Write))?;
                outcome = CasOutcome::Committed(generation);
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if let CasOutcome::Committed(generation) = outcome {
            debug!(%app_id, generation, active = next.is_some(), "active schedule swapped");
        }
        Ok(outcome)
    }

    // ── Scale actions ──────────────────────────────────────────────

    /// Record an emitted scale action. Replays of the same action land on
    /// the same key, so at-least-once recording is an upsert.
    pub fn record_action(&self, action: &ScaleAction) -> StateResult<()> {
        let key = action.table_key();
        let value = serde_json::to_vec(action).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALE_ACTIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "scale action recorded");
        Ok(())
    }

    /// List an app's scale actions in chronological order (key order).
    pub fn list_actions(&self, app_id: &str) -> StateResult<Vec<ScaleAction>> {
        let prefix = format!("{app_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALE_ACTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let action: ScaleAction =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(action);
            }
        }
        Ok(results)
    }

    /// Delete scale actions older than `cutoff`, across all apps. Returns
    /// the number deleted.
    pub fn prune_actions_before(&self, cutoff: DateTime<Utc>) -> StateResult<u32> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SCALE_ACTIONS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let action: ScaleAction =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if action.timestamp < cutoff {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(SCALE_ACTIONS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count, %cutoff, "scale actions pruned");
        Ok(count)
    }
}
