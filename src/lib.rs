// src/lib.rs
pub mod cli;
pub mod commands;
pub mod config;
pub mod pipeline;
pub mod utils;

pub use cli::Arguments;
pub use pipeline::Pipeline;
