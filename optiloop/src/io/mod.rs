//! I/O for the optimization loop: processes, files, and the user channel.

pub mod attachments;
pub mod config;
pub mod conversation;
pub mod init;
pub mod model;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod schemas;
pub mod workspace;
