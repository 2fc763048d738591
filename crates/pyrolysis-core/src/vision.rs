//! Minimal client for the vision-capable chat-completions endpoint used to
//! classify a satellite tile. Deliberately thin: one request, one
//! response shape, base64-encoded image bytes inlined as an image_url data
//! URI, the way the original's OpenAI client does it. `usage` is kept as
//! an opaque JSON blob since the pipeline only ever stores it, never reads
//! specific fields from it.

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const VISION_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const VISION_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You inspect a single satellite tile image and report whether it shows \
the feature described by the user. Answer with exactly one of YES, NO, or MAYBE, followed by a short \
reason.";

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("vision endpoint returned status {0}")]
    Status(u16),
    #[error("vision response had an unexpected shape: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VisionVerdict {
    Yes,
    No,
    Maybe,
}

impl VisionVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisionVerdict::Yes => "YES",
            VisionVerdict::No => "NO",
            VisionVerdict::Maybe => "MAYBE",
        }
    }

    fn parse(text: &str) -> Self {
        let upper = text.trim_start().to_uppercase();
        if upper.starts_with("YES") {
            VisionVerdict::Yes
        } else if upper.starts_with("NO") {
            VisionVerdict::No
        } else {
            VisionVerdict::Maybe
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisionAnalysis {
    pub verdict: VisionVerdict,
    pub reasoning: String,
    pub usage: Value,
}

#[derive(Clone)]
pub struct VisionClient {
    http: Client,
    api_key: String,
}

impl VisionClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    /// Sends one image plus a prompt describing what to look for and
    /// returns the model's verdict, its reasoning text, and the raw usage
    /// object as reported by the endpoint. `mime_type` must match the
    /// actual encoding of `image_bytes` (`image/jpeg` for Mapbox tiles,
    /// `image/png` for Google static-map images).
    pub async fn analyze_tile(&self, image_bytes: &[u8], mime_type: &str, prompt: &str) -> Result<VisionAnalysis, VisionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let data_uri = format!("data:{mime_type};base64,{encoded}");

        let body = serde_json::json!({
            "model": VISION_MODEL,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_uri}},
                ]},
            ],
            "max_tokens": 200,
        });

        let response = self
            .http
            .post(VISION_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisionError::Status(status.as_u16()));
        }

        let payload: Value = response.json().await?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| VisionError::MalformedResponse("missing choices[0].message.content".into()))?;

        let usage = payload.get("usage").cloned().unwrap_or(Value::Null);

        Ok(VisionAnalysis {
            verdict: VisionVerdict::parse(text),
            reasoning: text.trim().to_string(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yes_verdict_case_insensitively() {
        assert_eq!(VisionVerdict::parse("yes, clearly visible"), VisionVerdict::Yes);
    }

    #[test]
    fn parses_no_verdict() {
        assert_eq!(VisionVerdict::parse("NO - nothing there"), VisionVerdict::No);
    }

    #[test]
    fn falls_back_to_maybe_for_ambiguous_text() {
        assert_eq!(VisionVerdict::parse("unclear, possibly"), VisionVerdict::Maybe);
    }
}
