//! Embedding providers: deterministic offline mock and HTTP-backed.

mod http_provider;
mod mock_provider;

pub use http_provider::HttpEmbeddingProvider;
pub(crate) use http_provider::{classify_reqwest_error, classify_status};
pub use mock_provider::MockEmbeddingProvider;
