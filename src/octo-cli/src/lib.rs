//! octo CLI library module.
//!
//! - `cli/` - argument parsing and command dispatch
//! - `login` - login, logout and status handlers
//! - `styled_output` - status line formatting

pub mod cli;
pub mod login;
pub mod styled_output;
