//! 命令行界面定义
//!
//! 定义了主程序的命令行参数和选项
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ctrlink")]
#[command(version)]
#[command(about = "Connect to a controller, log in and supervise the connection")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    /// Configuration file path (defaults to searching standard locations)
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Test configuration file
    Test {
        /// Configuration file path (optional, defaults to the searched location)
        #[arg(index = 1)]
        config_file: Option<PathBuf>,
    },

    /// Open a connection, print the negotiated session and close it
    Connect,

    /// Open a connection and wait until it breaks or Ctrl-C is pressed
    Watch,

    /// Connect once and print the Prometheus metrics
    Metrics,
}
