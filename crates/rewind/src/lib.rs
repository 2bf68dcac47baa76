//! Point-in-time recovery for MySQL-compatible databases: backup-chain
//! resolution, snapshot assembly and binary-log replay up to a target
//! instant.
//!
//! The flow is driven by [`coordinator::RestoreCoordinator`]; everything that
//! touches an external process sits behind the collaborator traits in
//! `rewind-core`, with subprocess-backed implementations under [`exec`].

pub mod applier;
pub mod assembler;
pub mod binlog;
pub mod catalog;
pub mod coordinator;
pub mod exec;
pub mod fetch;
pub mod fsutil;
pub mod resolver;
pub mod store;

pub use applier::{ReplayApplier, ReplayOutcome};
pub use assembler::SnapshotAssembler;
pub use catalog::BackupCatalog;
pub use coordinator::{RestoreCoordinator, RestoreError, RestoreReport, RestoreStage};
pub use fetch::{MaterializedChain, MemberFetcher};
pub use resolver::{resolve_chain, ChainPin};
pub use store::FsObjectStore;
