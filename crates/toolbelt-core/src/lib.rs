pub mod config;
pub mod error;
pub mod git;
pub mod io;
pub mod paths;
pub mod process;
pub mod runner;
pub mod text;
pub mod tools;

pub use error::{Result, RunError, ToolbeltError};
pub use runner::{run, run_command_with_timeout, CommandOutput, CommandSpec};
