//! redb table definitions for the Skyward state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Scale-action keys embed a zero-padded millisecond timestamp so
//! redb's key order is chronological per app.

use redb::TableDefinition;

/// Validated scaling policies keyed by `{app_id}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Active-schedule records keyed by `{app_id}`.
pub const ACTIVE_SCHEDULES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("active_schedules");

/// Emitted scale actions keyed by `{app_id}:{timestamp_ms:020}:{reason}`.
pub const SCALE_ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("scale_actions");
