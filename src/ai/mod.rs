pub mod http_client;
pub mod ollama;
pub mod prompts;
pub mod types;

pub use ollama::{DescriptionProvider, OllamaClient};
pub use types::ModelInfo;
