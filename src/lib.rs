//! convtree: a registry of conversation files with an HTTP API and an LLM
//! gateway that reshapes flat discussions into conversation trees.

pub mod config;
pub mod error;
pub mod files;
pub mod llm;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
