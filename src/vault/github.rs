//! GitHub personal-access-token validation against the live API.

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};

#[derive(Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Validate a PAT and return the scopes it actually grants.
    ///
    /// Classic tokens report grants in the `X-OAuth-Scopes` header. When the
    /// header is absent or empty (fine-grained tokens), fall back to one
    /// capability probe per expected scope and report the expected set.
    pub async fn validate_pat(
        &self,
        token: &str,
        scopes_expected: &[String],
    ) -> anyhow::Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/user", self.base_url))
            .header(AUTHORIZATION, format!("token {}", token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "repolens")
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("Invalid GitHub token");
        }

        let granted: Vec<String> = resp
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        if !granted.is_empty() {
            return Ok(granted);
        }

        for scope in scopes_expected {
            match scope.as_str() {
                "repo" => {
                    let r = self
                        .probe(token, &format!("{}/user/repos?per_page=1", self.base_url))
                        .await?;
                    if !r {
                        anyhow::bail!("Token lacks repo access");
                    }
                }
                "read:org" => {
                    let r = self
                        .probe(token, &format!("{}/user/orgs?per_page=1", self.base_url))
                        .await?;
                    if !r {
                        anyhow::bail!("Token lacks org read access");
                    }
                }
                _ => {}
            }
        }

        Ok(scopes_expected.to_vec())
    }

    async fn probe(&self, token: &str, url: &str) -> anyhow::Result<bool> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("token {}", token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "repolens")
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}
