//! # Cli
//!
//! This module contains everything needed for parsing the CLI arguments for
//! the MiniScript driver.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Struct containing the CLI configuration for the MiniScript driver.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Specify the log level of the interpreter.
    #[arg(value_enum, short, long, default_value_t = LogLevel::default())]
    pub verbosity: LogLevel,
}

impl Cli {
    pub fn init() -> Self {
        Cli::parse()
    }
}

/// Enum for specifying the log level of the interpreter.
#[derive(ValueEnum, Clone, Default, Debug)]
pub enum LogLevel {
    /// The default log level. Only critical errors will be logged.
    #[default]
    #[value(alias("0"))]
    Error,

    /// Also log warnings (e.g., `localOnly` deprecation notices).
    #[value(alias("1"))]
    Warn,

    /// Also log information about the general state of the interpreter.
    #[value(alias("2"))]
    Info,

    /// Log everything which happens internally in the VM.
    #[value(alias("3"))]
    Debug,

    /// Log extra information, including per-opcode tracing.
    #[value(alias("4"))]
    Trace,
}

impl From<&LogLevel> for log::Level {
    fn from(value: &LogLevel) -> Self {
        match value {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compile and run a MiniScript source file.
    Run(RunArgs),

    /// Start an interactive REPL.
    Repl,

    /// Run the built-in test harness.
    Test(TestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// The path to the MiniScript source file.
    #[arg(index = 1)]
    pub file: std::path::PathBuf,

    /// Dump the compiled TAC program before execution.
    #[arg(long)]
    pub dump_tac: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TestArgs {
    /// Run the `====`/`----`-delimited fixture file instead of the built-in smoke scripts.
    #[arg(long)]
    pub integration: Option<std::path::PathBuf>,
}
