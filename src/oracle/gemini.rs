use super::{OracleError, TransformationOracle};
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff
const MAX_OUTPUT_TOKENS: u32 = 8192;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiOracle {
    client: reqwest::Client,
    model: String,
    api_key: String,
}

impl GeminiOracle {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Result<Self, OracleError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(OracleError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            model: model.into(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model)
    }
}

fn build_request(context: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(context.to_string()),
            }],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: MAX_OUTPUT_TOKENS,
        },
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: &str) -> Result<String, OracleError> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        OracleError::MalformedResponse(format!("{}: {}", e, truncate(body, 200)))
    })?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or(OracleError::EmptyCandidate)?;

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(match candidate.finish_reason {
            Some(reason) if reason != "STOP" => {
                OracleError::MalformedResponse(format!("generation stopped: {}", reason))
            }
            _ => OracleError::EmptyCandidate,
        });
    }
    Ok(text)
}

/// Extract retry-after hint from a rate limit body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

#[async_trait]
impl TransformationOracle for GeminiOracle {
    async fn generate(&self, context: &str) -> Result<String, OracleError> {
        let request = build_request(context);
        let mut retry_count = 0;

        loop {
            let response = self
                .client
                .post(self.url())
                .header("Content-Type", "application/json")
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                return extract_text(&text);
            }

            if status.as_u16() == 429 {
                if retry_count >= MAX_RETRIES {
                    return Err(OracleError::RateLimited {
                        retries: retry_count,
                    });
                }
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                tracing::warn!(
                    model = %self.model,
                    retry_after_secs = retry_after,
                    attempt = retry_count,
                    max = MAX_RETRIES,
                    "oracle rate limited; backing off"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            return Err(OracleError::Http {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape_matches_generate_content() {
        let json = serde_json::to_value(build_request("hello")).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], MAX_OUTPUT_TOKENS);
    }

    #[test]
    fn test_extract_text_joins_parts_of_first_candidate() {
        let body = r#"{"candidates":[
            {"content":{"role":"model","parts":[{"text":"```python\n"},{"text":"print(1)\n```"}]},"finishReason":"STOP"},
            {"content":{"parts":[{"text":"ignored"}]}}
        ]}"#;
        assert_eq!(extract_text(body).unwrap(), "```python\nprint(1)\n```");
    }

    #[test]
    fn test_extract_text_reports_empty_and_blocked_candidates() {
        assert!(matches!(
            extract_text(r#"{"candidates":[]}"#),
            Err(OracleError::EmptyCandidate)
        ));
        assert!(matches!(
            extract_text(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#),
            Err(OracleError::MalformedResponse(_))
        ));
        assert!(matches!(
            extract_text("not json"),
            Err(OracleError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("Please retry after 7 seconds"), Some(7));
        assert_eq!(parse_retry_after("quota exceeded"), None);
        assert_eq!(parse_retry_after("retry in 9999s"), None);
    }

    #[test]
    fn test_new_rejects_blank_key() {
        assert!(matches!(
            GeminiOracle::new("gemini-flash-latest", "  "),
            Err(OracleError::MissingApiKey)
        ));
    }
}
