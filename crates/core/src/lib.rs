//! `jobloom-core`: foundation building blocks shared by every crate.
//!
//! This crate contains **pure** primitives (no storage or process concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{HistoryEntryId, JobId, JobTypeId};
