use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::env;

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_base: String, // e.g. "https://generativelanguage.googleapis.com"
    pub api_key: String,  // env GEMINI_API_KEY
    pub model: String,    // e.g. "gemini-2.5-flash"
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".into()),
        }
    }
}

impl GeminiConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Thin client for the Gemini generateContent endpoint. Sends one text
/// prompt, returns the first candidate's text.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            bail!("GEMINI_API_KEY missing");
        }
        Ok(Self {
            http: Client::new(),
            cfg,
        })
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.cfg.api_base, self.cfg.model
        );
        let req = json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ]
        });

        let resp = self
            .http
            .post(url)
            .query(&[("key", self.cfg.api_key.as_str())])
            .json(&req)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            bail!("Gemini error {}: {}", status, text);
        }
        let v: Value = serde_json::from_str(&text).context("failed to parse Gemini response JSON")?;
        let completion = v
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|x| x.as_str())
            .context("Gemini response carried no candidate text")?;
        Ok(completion.to_string())
    }
}
