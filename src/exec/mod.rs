//! Shell execution with timeout enforcement. Only reached through
//! [`crate::safety::SafetyLayer::execute`].

pub mod shell;

pub use shell::{execute_shell, ExecResult};
