//! The agent: plan repair, command dispatch, verification, and the loop that
//! ties them together.

pub mod agent_loop;
pub mod authorize;
pub mod builtin;
pub mod commands;
pub mod context;
pub mod logging;
pub mod plan;
pub mod repair;
pub mod session;
pub mod system_prompt;
pub mod verify;
