//! Persistence for Turnkeep.
//!
//! [`Storage`] is the contract the orchestration core writes sessions,
//! turns and messages through; [`MemoryStore`] is the bundled
//! implementation used by single-instance deployments, tests and the CLI.

pub mod memory;
pub mod storage;

pub use memory::MemoryStore;
pub use storage::Storage;
