pub mod chat;
pub mod embeddings;

pub use chat::{ChatClient, ChatMessage, ChatOutcome};
pub use embeddings::{Embedder, HttpEmbedder};
