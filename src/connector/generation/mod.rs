//! Grounded answer generation over a chat-completion endpoint.

mod http_client;

pub use http_client::HttpGenerationClient;
