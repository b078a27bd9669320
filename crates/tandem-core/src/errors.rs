use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// A producer-side call violated a scene invariant (unknown node, wrong
    /// node kind, removing something that was never registered).
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
    #[error("Missing graphics capability: {0}")]
    MissingCapability(String),
    #[error("Render thread failed: {0}")]
    ThreadFailure(String),
    #[error("Failed to allocate render target ({width}x{height})")]
    TargetAllocation { width: u32, height: u32 },
    #[error("Window surface error: {0}")]
    Surface(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Recursion depth limit exceeded")]
    RecursionLimit,
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl RenderError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
