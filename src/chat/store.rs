//! In-memory conversation store. Deliberately process-local: history is lost
//! on restart, and append/read for one conversation id serializes through
//! the map's per-entry locking.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub sources: Option<Vec<String>>,
    pub tokens_used: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub repo_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

#[derive(Default)]
pub struct ConversationStore {
    inner: DashMap<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, creating the conversation lazily on first use.
    pub fn append(
        &self,
        conversation_id: &str,
        repo_id: Option<&str>,
        role: Role,
        content: impl Into<String>,
        sources: Option<Vec<String>>,
        tokens_used: Option<i64>,
    ) {
        let mut entry = self
            .inner
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation {
                repo_id: repo_id.map(String::from),
                created_at: Utc::now(),
                messages: Vec::new(),
            });

        if entry.repo_id.is_none() {
            entry.repo_id = repo_id.map(String::from);
        }

        entry.messages.push(Message {
            role,
            content: content.into(),
            sources,
            tokens_used,
            created_at: Utc::now(),
        });
    }

    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.inner.get(conversation_id).map(|c| c.clone())
    }

    /// Returns true iff a conversation existed.
    pub fn delete(&self, conversation_id: &str) -> bool {
        self.inner.remove(conversation_id).is_some()
    }

    /// Wipe every conversation. Used when a repository is re-indexed to
    /// avoid context bleed across snapshots.
    pub fn clear_all(&self) {
        self.inner.clear();
    }

    /// Answer "what was my last question": the user turn before the current
    /// one, or the first-question wording when there is no prior turn.
    pub fn last_user_question_before(&self, conversation_id: &str) -> String {
        let user_messages: Vec<String> = self
            .inner
            .get(conversation_id)
            .map(|c| {
                c.messages
                    .iter()
                    .filter(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .collect()
            })
            .unwrap_or_default();

        if user_messages.len() < 2 {
            "This is your first question in this chat.".to_string()
        } else {
            format!(
                "Your last question was: \"{}\"",
                user_messages[user_messages.len() - 2]
            )
        }
    }
}
