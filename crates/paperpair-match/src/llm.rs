//! Judgment-service contract and the production OpenAI-compatible client
//! (DeepSeek defaults). The client owns the response cache and usage
//! accounting; retry policy belongs to the caller.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, warn};

use paperpair_core::AppConfig;
use paperpair_core::config::LimitsConfig;

use crate::cache::{ResponseCache, request_key};
use crate::error::{MatchError, Result};
use crate::prompts;
use crate::stats::{self, UsageStats};

/// Everything the matcher needs from a language model. Object-safe so the
/// verifier can hold a `dyn JudgmentService` and tests can inject mocks.
#[async_trait]
pub trait JudgmentService: Send + Sync {
    /// Free-text answer to a comparison or extraction prompt; the caller
    /// parses structure out of it.
    async fn judge(&self, prompt: &str) -> Result<String>;

    /// English rendering of a Chinese paper title, verbatim.
    async fn translate(&self, chinese_title: &str) -> Result<String>;
}

/// Resolve the chat-completions endpoint from a configured base URL.
fn resolve_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

pub struct DeepSeekClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
    cache: ResponseCache,
    limits: LimitsConfig,
    stats: Mutex<UsageStats>,
    stats_path: PathBuf,
}

impl DeepSeekClient {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| MatchError::MissingApiKey(config.llm.api_key_env.clone()))?;
        let cache = ResponseCache::new(
            "responses",
            Duration::from_secs(config.llm.cache_ttl_hours * 3600),
        );
        Self::new(config, api_key, cache, stats::stats_path())
    }

    /// Fully explicit constructor; tests point this at a mock server and a
    /// temp cache/stats location.
    pub fn new(
        config: &AppConfig,
        api_key: String,
        cache: ResponseCache,
        stats_path: PathBuf,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout_secs))
            .gzip(true)
            .build()?;
        let stats = UsageStats::load_from(&stats_path).unwrap_or_default();
        Ok(Self {
            client,
            endpoint: resolve_endpoint(&config.llm.base_url),
            model: config.llm.model.clone(),
            api_key,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            cache,
            limits: config.limits.clone(),
            stats: Mutex::new(stats),
            stats_path,
        })
    }

    pub fn usage(&self) -> UsageStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let key = request_key(&self.model, prompt, self.temperature, self.max_tokens);
        if let Some(cached) = self.cache.get::<String>(&key).await {
            debug!("cache hit");
            return Ok(cached);
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if resp.status() == 429 {
            let wait = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(MatchError::RateLimit(self.endpoint.clone(), wait));
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let msg = resp.text().await.unwrap_or_default();
            return Err(MatchError::ApiError(
                self.endpoint.clone(),
                format!("HTTP {status}: {msg}"),
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MatchError::Parse("response carried no message content".to_string()))?
            .to_string();

        let tokens = json["usage"]["total_tokens"].as_u64().unwrap_or(0);
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_call(tokens, &self.limits);
            if let Err(e) = stats.save_to(&self.stats_path) {
                warn!(error = %e, "failed to persist usage stats");
            }
        }

        self.cache.set(&key, &content).await;
        Ok(content)
    }
}

#[async_trait]
impl JudgmentService for DeepSeekClient {
    async fn judge(&self, prompt: &str) -> Result<String> {
        self.complete(prompt).await
    }

    async fn translate(&self, chinese_title: &str) -> Result<String> {
        let prompt = prompts::translate_prompt(chinese_title);
        let reply = self.complete(&prompt).await?;
        Ok(reply.trim().trim_matches('"').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(base_url: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.base_url = base_url.to_string();
        config.llm.timeout_secs = 5;
        config
    }

    fn test_client(base_url: &str, dir: &TempDir) -> DeepSeekClient {
        let cache = ResponseCache::at(dir.path().join("cache"), Duration::from_secs(3600));
        DeepSeekClient::new(
            &test_config(base_url),
            "test-key".to_string(),
            cache,
            dir.path().join("usage.json"),
        )
        .unwrap()
    }

    fn chat_body(content: &str, total_tokens: u64) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"total_tokens": total_tokens},
        })
        .to_string()
    }

    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            resolve_endpoint("https://api.deepseek.com"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_endpoint("https://api.deepseek.com/v1/"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:1234/v1/chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn judge_returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(chat_body("{\"is_same_paper\": true}", 120))
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let client = test_client(&server.url(), &dir);
        let reply = client.judge("compare these").await.unwrap();
        assert_eq!(reply, "{\"is_same_paper\": true}");

        let usage = client.usage();
        assert_eq!(usage.total_calls, 1);
        assert_eq!(usage.total_tokens, 120);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn second_identical_call_is_served_from_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(chat_body("cached answer", 50))
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let client = test_client(&server.url(), &dir);
        let first = client.judge("same prompt").await.unwrap();
        let second = client.judge("same prompt").await.unwrap();
        assert_eq!(first, second);
        // only one HTTP call, and only one accounted call
        assert_eq!(client.usage().total_calls, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_maps_to_typed_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let client = test_client(&server.url(), &dir);
        let err = client.judge("anything").await.unwrap_err();
        assert!(matches!(err, MatchError::RateLimit(_, 7)));
    }

    #[tokio::test]
    async fn translate_strips_quotes_and_whitespace() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(chat_body("  \"A Survey of Deep Learning\"  ", 30))
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let client = test_client(&server.url(), &dir);
        let title = client.translate("深度学习综述").await.unwrap();
        assert_eq!(title, "A Survey of Deep Learning");
    }
}
