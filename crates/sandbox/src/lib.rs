#![deny(unused)]
//! Warm sandbox pool for the agent runtime.
//!
//! This crate does not run containers. It keeps the bookkeeping records for
//! them in a [`ContainerStore`](agent_runtime_core::traits::ContainerStore)
//! and decides which record a task gets.
//!
//! # Lifecycle
//!
//! ```text
//!   replenish tick                 acquire (warm hit)        release
//!  ───────────────► warming ──► warm ──────────────► assigned ───────► expired
//!                                                      ▲                   │
//!   acquire (cold start) ──────────────────────────────┘                   │
//!                                                                           ▼
//!                                                    cleanup tick ──► deleted
//! ```

pub mod pool;
pub mod scheduler;
pub mod stats;

pub use pool::{ReplenishReport, WarmPoolManager};
pub use scheduler::PoolScheduler;
pub use stats::{PoolStats, TemplateStats};
