#![deny(unused)]
//! Tools for the agent runtime.
//!
//! This crate provides:
//! - Tool registry for the capability catalog
//! - Tool executor enforcing permissions, rate limits, confirmation,
//!   timeouts and the safety pipeline around every call
//! - Built-in tools (shell, file, browser, search, webdev, plan, message)
//! - Per-task sandbox leases and the HTTP client for the execution backend

pub mod builtin;
pub mod executor;
pub mod registry;
pub mod remote;
pub mod sandboxes;

pub use builtin::{builtin_definitions, register_builtin_tools, BuiltinServices, RemoteTool};
pub use executor::{ExecuteOptions, ToolExecutor};
pub use registry::DefaultToolRegistry;
pub use remote::HttpRemoteExecutor;
pub use sandboxes::{template_for, TaskSandboxes};
