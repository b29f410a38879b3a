//! Command-line surface: argument parsing, the interactive menu, and the
//! handlers that wire commands to the library.

pub mod commands;
pub mod handlers;
pub mod menu;

pub use commands::{CliArgs, Commands, FormatArgs, OutputFormatArg};
pub use menu::TerminalConfirmation;
