//! Command-line interface: subcommands and their handlers.

pub mod commands;
pub mod handlers;

pub use commands::Commands;
pub use handlers::run;
