use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("cannot create download directory {dir}: {source}")]
    DownloadDirUnavailable {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("external tool is missing: {tool}")]
    ToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {detail}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("a download is already running")]
    Busy,

    #[error("config error: {0}")]
    ConfigInvalid(String),

    #[error("tool install failed: {0}")]
    InstallFailed(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
