//! CLI argument definitions using Clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::session::AudioFormat;

/// TavernTapes - long-form session recorder for tabletop games
#[derive(Parser, Debug)]
#[command(name = "tavern-tapes")]
#[command(version)]
#[command(about = "Record multi-hour tabletop sessions with crash-safe segmented storage")]
pub struct Cli {
    /// Storage root (overrides the configured storage location)
    #[arg(long, global = true, value_name = "DIR")]
    pub storage: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a session until Ctrl-C
    Record {
        /// Session name; left empty, one is synthesized from the date
        #[arg(default_value = "")]
        name: String,

        /// Container to record into
        #[arg(long, value_name = "FORMAT")]
        format: Option<FormatArg>,

        /// Bitrate for the compressed container (64-320, step 32)
        #[arg(long, value_name = "KBPS")]
        quality: Option<u32>,

        /// Split segments every N minutes (1-120)
        #[arg(long, value_name = "MINUTES")]
        split_interval: Option<u32>,

        /// Split segments above N megabytes
        #[arg(long, value_name = "MB")]
        split_size: Option<u64>,

        /// Disable automatic splitting entirely
        #[arg(long, conflicts_with_all = ["split_interval", "split_size"])]
        no_split: bool,

        /// Input device id (see `devices`)
        #[arg(long, value_name = "ID")]
        device: Option<String>,
    },

    /// List or inspect recorded sessions
    Sessions {
        #[command(subcommand)]
        action: Option<SessionsAction>,
    },

    /// Append a note to a session
    Note {
        /// Session id
        id: String,
        /// Note text (at most 1000 characters)
        text: String,
    },

    /// Manage session tags
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Export a session's audio to a file
    Export {
        /// Session id
        id: String,
        /// Output path (defaults to `{session_name}.{ext}`)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Delete a session and all of its segments
    Delete {
        /// Session id
        id: String,
    },

    /// Read or write settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Resume an interrupted session from its checkpoint
    Recover,

    /// Discard the interrupted-session checkpoint
    Discard,

    /// List audio input devices
    Devices,
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// All sessions, newest first
    List,
    /// Sessions matching every word of the query
    Search { query: String },
    /// Full detail for one session
    Show { id: String },
}

#[derive(Subcommand, Debug)]
pub enum TagAction {
    /// Add tags to a session
    Add { id: String, tags: Vec<String> },
    /// Remove one tag from a session
    Rm { id: String, tag: String },
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Print one setting, or all of them
    Get { key: Option<String> },
    /// Write one setting
    Set { key: String, value: String },
    /// Reset every setting to its default
    Clear,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FormatArg {
    Wav,
    Compressed,
}

impl From<FormatArg> for AudioFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Wav => AudioFormat::Wav,
            FormatArg::Compressed => AudioFormat::Compressed,
        }
    }
}
