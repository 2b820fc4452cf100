//! skyward-state — embedded state store for the Skyward decision core.
//!
//! Backed by [redb](https://docs.rs/redb), persists the three artifacts
//! the core owns: validated policies, per-app active-schedule records
//! (versioned for compare-and-swap), and emitted scale actions.
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite action keys (`{app_id}:{timestamp_ms}:{reason}`) make prefix
//! scans per app cheap and replays idempotent.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod records;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use records::{ActiveScheduleRecord, CasOutcome};
pub use store::StateStore;
