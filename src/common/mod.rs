pub mod config;
pub mod paths;
pub mod platform;
pub mod shell;
