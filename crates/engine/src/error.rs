#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no sandbox for this user")]
    NotFound,

    #[error("a sandbox already exists for this user")]
    AlreadyExists,

    #[error("path escapes the sandbox root: {0}")]
    PathEscape(String),

    #[error("an execution is already in flight for this sandbox")]
    SandboxBusy,

    #[error("directory is not empty (pass recursive to remove it)")]
    NotEmpty,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("corrupt sandbox metadata: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
