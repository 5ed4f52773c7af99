//! Chat-completion collaborator: answer generation over retrieved context
//! and follow-up question suggestions.

use serde::{Deserialize, Serialize};

const FOLLOWUP_PROMPT: &str = "You are an expert developer assistant.\n\n\
Given the user's question and the answer provided,\n\
generate EXACTLY 3 engaging follow-up questions.\n\n\
Rules:\n\
- Questions must be directly related to the repository/code.\n\
- They should encourage deeper exploration.\n\
- Do NOT repeat the original question.\n\
- Do NOT include numbering or bullet points.\n\
- Each question must end with a '?'.\n\n\
User Question:\n{question}\n\nAnswer:\n{answer}\n\n\
Return ONLY the questions, one per line.";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub answer: String,
    pub tokens_used: Option<i64>,
}

#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: i64,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<ChatOutcome> {
        self.complete_with_temperature(messages, 0.2).await
    }

    async fn complete_with_temperature(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> anyhow::Result<ChatOutcome> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&CompletionRequest {
                model: &self.model,
                temperature,
                messages,
            });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("chat API returned {}", resp.status());
        }

        let body: CompletionResponse = resp.json().await?;
        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat API returned no choices"))?;

        Ok(ChatOutcome {
            answer,
            tokens_used: body.usage.map(|u| u.total_tokens),
        })
    }

    /// Ask for exactly three follow-up questions about an answer.
    pub async fn generate_followups(
        &self,
        question: &str,
        answer: &str,
    ) -> anyhow::Result<Vec<String>> {
        let prompt = FOLLOWUP_PROMPT
            .replace("{question}", question)
            .replace("{answer}", answer);

        let outcome = self
            .complete_with_temperature(&[ChatMessage::user(prompt)], 0.7)
            .await?;

        Ok(parse_followups(&outcome.answer))
    }
}

/// Keep only lines that look like questions, capped at three.
pub fn parse_followups(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| line.ends_with('?'))
        .map(String::from)
        .take(3)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn followups_keep_only_questions_and_cap_at_three() {
        let raw = "How does auth work?\nnot a question\nWhat about caching?\nWhy sharding?\nA fourth one?";
        let parsed = parse_followups(raw);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], "How does auth work?");
        assert!(parsed.iter().all(|q| q.ends_with('?')));
    }

    #[tokio::test]
    async fn completes_against_a_mock_endpoint() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "The gateway verifies keys by hash."}}],
                "usage": {"total_tokens": 42}
            })))
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri(), None, "test-model");
        let outcome = client
            .complete(&[ChatMessage::user("how does auth work?")])
            .await
            .unwrap();
        assert_eq!(outcome.answer, "The gateway verifies keys by hash.");
        assert_eq!(outcome.tokens_used, Some(42));
    }
}
