use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "autoloop", version, about = "Autonomous plan-act-observe agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new agent run
    Run {
        /// Model used for planning turns (e.g., "llama3.2", "gpt-4o-mini")
        #[arg(short, long)]
        model: Option<String>,

        /// Model used for repair, verification and self-feedback
        #[arg(long)]
        fast_model: Option<String>,

        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Path to config file (overrides default search)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip interactive authorization of commands
        #[arg(long)]
        continuous: bool,

        /// Stop after this many turns (0 = unlimited)
        #[arg(long)]
        max_turns: Option<u64>,

        /// Agent name
        #[arg(long)]
        name: Option<String>,

        /// Agent role
        #[arg(long)]
        role: Option<String>,

        /// Agent goal (repeat for several goals)
        #[arg(short, long = "goal")]
        goals: Vec<String>,
    },
    /// List the commands available to an agent
    Commands {
        /// Show the restricted sub-agent scope instead of the root scope
        #[arg(long)]
        sub_agent: bool,

        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Path to config file (overrides default search)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
