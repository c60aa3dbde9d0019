use anyhow::Result;
use serde::Deserialize;
use tracing::warn;

use crate::config::Config;

/// Client for the local text-generation endpoint used to enrich prompts
/// before they are sent to the image app.
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

const ENHANCE_PREAMBLE: &str = "You are an art director writing prompts for \
an AI image generator. Expand the user prompt into a vivid description \
covering lighting, color, texture, composition and style. Respond with the \
enhanced prompt only, at most 60 words.";

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.llm_base_url.clone(),
            model: config.llm_model.clone(),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false
        });

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {} {}", status, body);
        }

        let data: GenerateResponse = resp.json().await?;
        Ok(data.response.trim().to_string())
    }

    /// Enrich a raw user prompt. Falls back to the input when the endpoint
    /// is unreachable so generation can proceed with the plain prompt.
    pub async fn enhance_prompt(&self, prompt: &str) -> String {
        let request = format!(
            "{}\n\nUser prompt: {}\nEnhanced prompt:",
            ENHANCE_PREAMBLE, prompt
        );
        match self.generate(&request).await {
            Ok(enhanced) if !enhanced.is_empty() => enhanced,
            Ok(_) => prompt.to_string(),
            Err(e) => {
                warn!("Prompt enhancement failed, using raw prompt: {}", e);
                prompt.to_string()
            }
        }
    }

    /// Rewrite an existing enhanced prompt to apply a requested change while
    /// keeping everything not mentioned in the request intact.
    pub async fn enhance_edit_prompt(&self, current_prompt: &str, edit_request: &str) -> String {
        let request = format!(
            "CURRENT IMAGE PROMPT: \"{}\"\n\nREQUESTED CHANGE: \"{}\"\n\n\
             Rewrite the current prompt so it applies only the requested \
             change, keeping every other element, the style and the subject \
             unchanged.\n\nNEW PROMPT:",
            current_prompt, edit_request
        );
        self.enhance_prompt(&request).await
    }
}
