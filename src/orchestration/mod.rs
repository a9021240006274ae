//! Sub-agent orchestration.
//!
//! [`spawner::SubAgentSpawner`] runs capability-restricted child loops and
//! keeps a ledger of them. [`manager::AgentManager`] owns the lightweight
//! keyed chat agents behind the `start_agent` family of commands. Shared
//! [`types`] are used across both.

pub mod manager;
pub mod spawner;
pub mod types;
