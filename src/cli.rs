//! Command-line interface definition for mcp-chat
//!
//! This module defines the CLI structure using clap's derive API.

use crate::config::DEFAULT_CONFIG_FILE;
use clap::Parser;
use std::path::PathBuf;

/// mcp-chat - Chat with an LLM agent that can call MCP server tools
///
/// Reads a JSON5 config describing the LLM and the MCP servers, starts the
/// servers, and opens an interactive prompt.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-chat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON5 configuration file
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Directory for per-server stderr logs
    #[arg(long, value_name = "PATH", default_value = ".")]
    pub log_dir: PathBuf,

    /// Enable verbose logging and show raw tool output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_FILE),
            log_dir: PathBuf::from("."),
            verbose: false,
        }
    }
}
