//! Styled CLI output.
//!
//! Status lines go to stderr so stdout stays clean for the authorization URL.
//! Colors are used only on a terminal and respect the NO_COLOR environment
//! variable.

use std::io::IsTerminal;

const SUCCESS: &str = "\x1b[38;2;0;245;212m";
const ERROR: &str = "\x1b[38;2;255;107;107m";
const WARNING: &str = "\x1b[38;2;255;200;87m";
const INFO: &str = "\x1b[38;2;72;202;228m";
const DIM: &str = "\x1b[38;2;130;154;177m";
const RESET: &str = "\x1b[0m";

/// Check if colors should be disabled based on NO_COLOR env var.
fn colors_disabled() -> bool {
    std::env::var("NO_COLOR")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Message type for styled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Success,
    Error,
    Warning,
    Info,
    Dim,
}

impl MessageType {
    fn icon(self) -> &'static str {
        match self {
            MessageType::Success => "[OK]",
            MessageType::Error => "[ERROR]",
            MessageType::Warning => "[WARN]",
            MessageType::Info => "[INFO]",
            MessageType::Dim => "-",
        }
    }

    fn color(self) -> &'static str {
        match self {
            MessageType::Success => SUCCESS,
            MessageType::Error => ERROR,
            MessageType::Warning => WARNING,
            MessageType::Info => INFO,
            MessageType::Dim => DIM,
        }
    }
}

/// Render one status line, colored or plain.
pub fn format_styled(msg_type: MessageType, message: &str, colored: bool) -> String {
    if colored {
        format!("{}{} {}{}", msg_type.color(), msg_type.icon(), message, RESET)
    } else {
        format!("{} {}", msg_type.icon(), message)
    }
}

fn print_styled(msg_type: MessageType, message: &str) {
    let colored = !colors_disabled() && std::io::stderr().is_terminal();
    eprintln!("{}", format_styled(msg_type, message, colored));
}

pub fn print_success(message: &str) {
    print_styled(MessageType::Success, message);
}

pub fn print_error(message: &str) {
    print_styled(MessageType::Error, message);
}

pub fn print_warning(message: &str) {
    print_styled(MessageType::Warning, message);
}

pub fn print_info(message: &str) {
    print_styled(MessageType::Info, message);
}

pub fn print_dim(message: &str) {
    print_styled(MessageType::Dim, message);
}
