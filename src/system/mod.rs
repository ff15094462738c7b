//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the underlying
//! operating system. It serves as a boundary between the core engine and the
//! specifics of process management, template rendering, and filesystem glue.
//!
//! ## Modules
//!
//! - **`executor`**: synchronous, shell-interpreted spawning of external
//!   commands, with exit codes surfaced to the caller.
//! - **`template`**: the rendering dialects used to materialize a job's
//!   input file from a template and a resolved state.
//! - **`fs_ops`**: directory creation and best-effort file/tree copying.

pub mod executor;
pub mod fs_ops;
pub mod template;
