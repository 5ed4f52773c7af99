pub mod engine;
pub mod router;
pub mod store;

pub use engine::{ChatEngine, ChatReply, ChatRequest};
pub use router::{classify, QueryKind};
pub use store::{Conversation, ConversationStore, Message, Role};
