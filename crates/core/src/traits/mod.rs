//! Collaborator contracts for the agent runtime.
//!
//! Traits are organized by component:
//! - `skills`: tool capabilities, the tool catalog, remote execution
//! - `governance`: human confirmation of risky calls
//! - `store`: durable lock and container records
//! - `coordination`: agent messaging, resource locking, sandbox provisioning
//! - `events`: structured runtime event sink

pub mod coordination;
pub mod events;
pub mod governance;
pub mod skills;
pub mod store;

pub use coordination::*;
pub use events::*;
pub use governance::*;
pub use skills::*;
pub use store::*;
