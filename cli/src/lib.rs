//! Sandbox Image CLI - download, delete, create and run layered templates.

pub mod commands;
pub mod output;
