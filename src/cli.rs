use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Inkwell - AI-assisted novel drafting.
#[derive(Parser)]
#[command(name = "inkwell")]
#[command(about = "Plan and draft novels chapter by chapter with an LLM", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Data folder holding the story, config and prompts (overrides inkwell.yml)
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive drafting session (default)
    Write,

    /// Run the shared backend that relays completions with a server-side key
    Serve {
        /// Port to listen on (defaults to PORT, then inkwell.yml)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Export the current story
    Export {
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Markdown)]
        format: ExportFormat,

        /// Output file (defaults to a name derived from the story title)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace the current story with an exported JSON story file
    Import {
        path: PathBuf,
    },

    /// Export or import configuration and prompts
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Write config (API key removed) and prompts to a JSON file
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge a settings JSON file over the current settings
    Import {
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Markdown,
    Json,
}
