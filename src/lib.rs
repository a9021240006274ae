pub mod agent;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod exec;
pub mod llm;
pub mod memory;
pub mod orchestration;
pub mod safety;
