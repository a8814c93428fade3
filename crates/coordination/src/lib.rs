#![deny(unused)]
//! Resource coordination between agents.
//!
//! Exclusive named locks guarded by a wait-for graph: a request that would
//! close a cycle is refused up front instead of waiting forever. Cycles that
//! form anyway are broken by preempting the lowest-priority agent, which is
//! told through its mailbox.

pub mod graph;
pub mod manager;
pub mod messenger;
pub mod sweeper;

pub use graph::WaitForGraph;
pub use manager::{role_from_id, role_priority, LockManager};
pub use messenger::ChannelMessenger;
pub use sweeper::{LockSweeper, SweepReport};
