//! Collaborator seams.
//!
//! The restore engine orchestrates four external collaborators: the database
//! engine process, the physical snapshot engine, the binlog reader and an
//! object store mirroring the catalog. Each is a trait so the whole flow can
//! run against in-memory doubles in tests.

pub mod binlog;
pub mod engine;
pub mod snapshot;
pub mod store;

pub use binlog::BinlogReader;
pub use engine::{DatabaseEngine, SqlError};
pub use snapshot::{ApplyMode, PrepareMode, SnapshotEngine};
pub use store::ObjectStore;
