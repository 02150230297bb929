//! OpenAI-compatible chat completion client

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::GenerationConfig;

use super::provider::{ChatMessage, GenerationError, GenerationProvider};

/// Chat transport over an OpenAI-compatible `/v1/chat/completions` endpoint
pub struct RemoteGenerator {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl RemoteGenerator {
    pub fn new(client: Client, base_url: &str, api_key: String, config: &GenerationConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        }
    }

    fn body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": stream,
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!("{}: {}", status, text)));
        }
        Ok(res)
    }

    async fn complete_with(&self, body: Value) -> Result<String, GenerationError> {
        let res = self.send(&body).await?;
        let payload: Value = res
            .json()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[async_trait]
impl GenerationProvider for RemoteGenerator {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        self.complete_with(self.body(messages, false)).await
    }

    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let mut body = self.body(messages, false);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("response_format".to_string(), json!({"type": "json_object"}));
        }
        self.complete_with(body).await
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, GenerationError>>, GenerationError> {
        let res = self.send(&self.body(messages, true)).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            // SSE events are newline-delimited but can split across byte
            // chunks; hold the trailing partial line until the next chunk
            let mut buffer = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line: String = buffer.drain(..=pos).collect();
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if line == "data: [DONE]" {
                                return;
                            }
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(event) = serde_json::from_str::<Value>(data) {
                                    if let Some(content) =
                                        event["choices"][0]["delta"]["content"].as_str()
                                    {
                                        if !content.is_empty()
                                            && tx.send(Ok(content.to_string())).await.is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(GenerationError::Stream(e.to_string()))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
