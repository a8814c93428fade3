//! Core type definitions for the agent runtime.
//!
//! Broken down by component: tools and results, per-call context, plans,
//! validation outcomes, lock records, warm container records, and audit
//! entries.

pub mod audit;
pub mod container;
pub mod context;
pub mod lock;
pub mod plan;
pub mod tool;
pub mod validation;

pub use audit::*;
pub use container::*;
pub use context::*;
pub use lock::*;
pub use plan::*;
pub use tool::*;
pub use validation::*;
