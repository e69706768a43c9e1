//! Shared domain types for Turnkeep: the data model (sessions, turns,
//! messages, task plans), configuration, error taxonomy and structured
//! trace events.

pub mod config;
pub mod error;
pub mod message;
pub mod plan;
pub mod session;
pub mod tool;
pub mod trace;
pub mod turn;

pub use error::{Error, Result};
