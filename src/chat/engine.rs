//! Chat orchestration: per-turn flow from repository guard through routing
//! to the retrieval/generation collaborator, recording both sides of the
//! exchange in the conversation store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm::{ChatClient, ChatMessage, Embedder};
use crate::repo::indexer::{IndexingScheduler, RepoIndex};
use crate::repo::ingest::SUPPORTED_EXTENSIONS;
use crate::store::Store;

use super::router::{classify, QueryKind};
use super::store::{ConversationStore, Role};

const GREETING_REPLY: &str = "Hi! I'm here to help you understand this repository.\n\n\
You can ask things like:\n\
- What does a file do?\n\
- Show code of a file\n\
- Explain the architecture\n\
- How different parts work together";

const SEMANTIC_TOP_K: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub repo_id: String,
    pub chat_id: Option<String>,
    #[allow(dead_code)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub chat_id: String,
    pub reply: String,
    pub tokens_used: Option<i64>,
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ChatEngine {
    conversations: Arc<ConversationStore>,
    scheduler: Arc<IndexingScheduler>,
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    chat: ChatClient,
}

impl ChatEngine {
    pub fn new(
        conversations: Arc<ConversationStore>,
        scheduler: Arc<IndexingScheduler>,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        chat: ChatClient,
    ) -> Self {
        Self {
            conversations,
            scheduler,
            store,
            embedder,
            chat,
        }
    }

    pub async fn handle(&self, req: ChatRequest) -> Result<ChatReply, AppError> {
        let chat_id = req
            .chat_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let repo = self
            .store
            .repo_by_id(&req.repo_id)
            .await?
            .ok_or(AppError::NotFound("repository"))?;

        if repo.indexed_at.is_none() {
            return Err(AppError::InvalidArgument(
                "Repository is not indexed yet. Please index it first.".to_string(),
            ));
        }

        // Cache miss here means the index was lost with the process; the
        // rebuild happens inline and the caller pays the latency.
        let index = self.scheduler.resolve(&req.repo_id).await?;

        self.conversations.append(
            &chat_id,
            Some(&req.repo_id),
            Role::User,
            &req.message,
            None,
            None,
        );

        if is_greeting(&req.message) {
            return Ok(self.finish(&chat_id, GREETING_REPLY.to_string(), None, Vec::new()));
        }

        if is_last_question_query(&req.message) {
            let answer = self.conversations.last_user_question_before(&chat_id);
            return Ok(self.finish(&chat_id, answer, Some(0), Vec::new()));
        }

        match classify(&req.message) {
            QueryKind::Structural => {
                let answer = index.manifest.render_structure();
                Ok(self.finish(&chat_id, answer, None, Vec::new()))
            }
            QueryKind::Content => {
                let (answer, sources) = content_answer(&index, &req.message);
                Ok(self.finish(&chat_id, answer, None, sources))
            }
            QueryKind::Semantic => self.semantic_answer(&chat_id, &index, &req.message).await,
        }
    }

    async fn semantic_answer(
        &self,
        chat_id: &str,
        index: &RepoIndex,
        question: &str,
    ) -> Result<ChatReply, AppError> {
        let query_embedding = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for the question"))?;

        let hits = index.search(&query_embedding, SEMANTIC_TOP_K);
        let context = hits
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut sources = Vec::new();
        for hit in &hits {
            if !sources.contains(&hit.file) {
                sources.push(hit.file.clone());
            }
        }

        let mut messages = vec![ChatMessage::system("You are a senior software engineer.")];
        if let Some(convo) = self.conversations.get(chat_id) {
            // Everything before the just-appended user turn is history.
            let prior = convo.messages.len().saturating_sub(1);
            for msg in &convo.messages[..prior] {
                messages.push(match msg.role {
                    Role::User => ChatMessage::user(msg.content.clone()),
                    Role::Assistant => ChatMessage::assistant(msg.content.clone()),
                });
            }
        }
        messages.push(ChatMessage::user(format!(
            "{}\n\nRepository Context:\n{}",
            question, context
        )));

        let outcome = self.chat.complete(&messages).await?;

        Ok(self.finish(chat_id, outcome.answer, outcome.tokens_used, sources))
    }

    fn finish(
        &self,
        chat_id: &str,
        reply: String,
        tokens_used: Option<i64>,
        sources: Vec<String>,
    ) -> ChatReply {
        self.conversations.append(
            chat_id,
            None,
            Role::Assistant,
            &reply,
            if sources.is_empty() {
                None
            } else {
                Some(sources.clone())
            },
            tokens_used,
        );

        ChatReply {
            chat_id: chat_id.to_string(),
            reply,
            tokens_used,
            sources,
            created_at: Utc::now(),
        }
    }
}

/// Content answers need a file name somewhere in the question.
fn content_answer(index: &RepoIndex, message: &str) -> (String, Vec<String>) {
    let filename = message
        .split_whitespace()
        .map(|w| w.trim_matches(|c| matches!(c, '`' | '"' | '\'' | ',' | '?' | ')' | '(')))
        .find(|w| {
            w.rsplit_once('.')
                .map(|(stem, ext)| !stem.is_empty() && SUPPORTED_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        });

    match filename {
        None => ("Please specify a file name.".to_string(), Vec::new()),
        Some(name) => match index.file_content(name) {
            Some(code) => (
                format!("```\n{}\n```", code),
                vec![name.to_string()],
            ),
            None => (format!("File not found: {}", name), Vec::new()),
        },
    }
}

fn is_greeting(question: &str) -> bool {
    matches!(
        question.to_lowercase().trim(),
        "hi" | "hii" | "hello" | "hey" | "hey there" | "good morning" | "good afternoon"
            | "good evening"
    )
}

fn is_last_question_query(text: &str) -> bool {
    let t = text.to_lowercase();
    ["last question", "previous question", "what did i ask", "what was my last"]
        .iter()
        .any(|p| t.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_detection() {
        assert!(is_greeting("hi"));
        assert!(is_greeting("  Hello "));
        assert!(!is_greeting("hi, what does main.py do?"));
    }

    #[test]
    fn last_question_detection() {
        assert!(is_last_question_query("what was my last question?"));
        assert!(is_last_question_query("repeat the previous question"));
        assert!(!is_last_question_query("what does the router do"));
    }
}
