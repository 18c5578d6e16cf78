mod chunker_service;
mod embedding_provider;
mod generation_provider;
mod vector_index;

pub use chunker_service::*;
pub use embedding_provider::*;
pub use generation_provider::*;
pub use vector_index::*;
