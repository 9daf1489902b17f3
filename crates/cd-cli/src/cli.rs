//! `clap`-derived subcommands (SPEC_FULL.md §4.K), shaped like the teacher's
//! `cli::Command` enum.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cadenced", version, about = "A distributed periodic task scheduler")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the dispatch loop (acquires the leader lock, fires due entries).
    Run {
        /// Stop after this many iterations; omit to run forever.
        #[arg(long)]
        max_iterations: Option<u64>,
    },
    /// List every entry (default entries first, then stored entries).
    List,
    /// Fetch a single entry by key.
    Get {
        key: String,
    },
    /// Save an entry from a JSON file (wire form, SPEC_FULL.md §6).
    Save {
        json_file: String,
        /// Overwrite client-read-only fields from this file instead of preserving
        /// the stored value.
        #[arg(long)]
        overwrite_read_only: bool,
    },
    /// Delete a stored entry by key.
    Delete {
        key: String,
    },
    /// Create the relational backend's tables. No-op for other backends.
    CreateTables,
}
