#[derive(Debug, Clone, thiserror::Error)]
pub enum SlateError {
    #[error("failed to spawn renderer: {0}")]
    Spawn(String),
    #[error("renderer exited with an error: {0}")]
    Render(String),
}
