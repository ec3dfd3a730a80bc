//! Common utilities shared across darksite modules

pub mod file_io;
pub mod shell;

pub use file_io::*;
pub use shell::shell_quote;
