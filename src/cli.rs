use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::InitialWindow;
use crate::utils::version;

#[derive(Parser)]
#[command(author, version = version(), about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/dwl-dbus/config.json`).
    ///
    /// This can also be set with the `DWL_DBUS_CONFIG` environment variable. If both are set, the
    /// command line argument takes precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Open a headless window at startup, in addition to those from the config.
    #[arg(long = "window", value_name = "APP_ID=TITLE")]
    pub windows: Vec<InitialWindow>,

    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

#[derive(Subcommand)]
pub enum Sub {
    /// Talk to a running dwl-dbus service over the session bus.
    Msg {
        #[command(subcommand)]
        msg: Msg,
        /// Print the raw payloads instead of a human-readable rendering.
        #[arg(short, long)]
        json: bool,
    },
    /// Validate the config file.
    Validate {
        /// Path to config file (default: `$XDG_CONFIG_HOME/dwl-dbus/config.json`).
        ///
        /// This can also be set with the `DWL_DBUS_CONFIG` environment variable. If both are set,
        /// the command line argument takes precedence.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum Msg {
    /// List open windows.
    Windows,
    /// Focus and raise a window by its id.
    Focus {
        /// Window id as printed by `msg windows`, e.g. `0x2a`.
        id: String,
    },
    /// Print the Message property, or set it.
    Message {
        /// New value.
        value: Option<String>,
    },
    /// Print the Count property.
    Count,
    /// Print window signals as they arrive.
    EventStream,
}
