use doc_model::EngineError;
use docview_cache::ConfigError;

/// Errors that can occur while opening a viewer session
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("document engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("document has no pages")]
    EmptyDocument,
}
