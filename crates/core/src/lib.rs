#![deny(unused)]
//! Core types, traits, and error definitions for the agent runtime.
//!
//! This crate provides the foundational building blocks shared by every
//! component: the tool data model, validation results, lock and container
//! records, collaborator contracts, and the sliding-window limiter used by
//! both the executor and the safety pipeline.

pub mod config;
pub mod error;
pub mod events;
pub mod mocks;
pub mod rate_limit;
pub mod schema;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use events::*;
pub use rate_limit::{RateLimitExceeded, SlidingWindowLimiter};
pub use schema::{FieldKind, ParamSchema, SchemaViolation};
pub use traits::*;
pub use types::*;
