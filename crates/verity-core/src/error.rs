use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or empty policy document. Fatal for the whole analysis.
    #[error("invalid input: {0}")]
    Input(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
