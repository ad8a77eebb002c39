//! Model backends: the language-model capability with an OpenAI-compatible
//! HTTP client, and query embedders (hashed lexical and ONNX Runtime).

mod lexical;
pub use lexical::LexicalEmbedder;

mod model;
pub use model::{LanguageModel, ModelError, Prompt, parse_json_reply};

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::{ChatClient, ChatError};

#[cfg(feature = "onnx")]
mod embedder;
#[cfg(feature = "onnx")]
pub use embedder::OnnxEmbedder;
