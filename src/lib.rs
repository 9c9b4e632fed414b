pub mod cmd;
pub mod config;
pub mod downloader;
mod error;
pub mod paths;
pub mod process;
pub mod session;
pub mod tools;
pub mod ytdlp;

pub use error::{EngineError, Result};
