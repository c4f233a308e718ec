use thiserror::Error;

/// Failure surfaced by the public player API.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("player has been disposed")]
    Disposed,
    #[error("invalid scene description: {0}")]
    InvalidDescription(#[from] serde_json::Error),
    #[error("scene loader failed: {0:#}")]
    Loader(#[from] anyhow::Error),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Failure raised while compiling or running a behavior script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("script returned {0} instead of a handler table")]
    InvalidHandlers(String),
    #[error("{0}")]
    Callback(String),
}

impl ScriptError {
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }
}
