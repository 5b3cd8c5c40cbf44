//! オラクルの通信層
//!
//! - GeminiTransport: Gemini generateContent API（HTTP）
//! - CliTransport: ローカルの AI CLI（claude / codex）
//!
//! どちらもプロンプト文字列を送り、モデルのテキスト出力をそのまま返す。
//! JSONの取り出しは上位（OracleClient）で行う。

use super::OracleError;
use crate::ai_provider::AiProvider;
use crate::config::Config;
use crate::error::{ClassifierError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// プロンプトを送ってテキスト応答を得る
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, OracleError>;

    /// ログ表示用の名前
    fn name(&self) -> &str;
}

/// 設定から通信層を作る
pub fn from_config(config: &Config) -> Result<Arc<dyn Transport>> {
    match config.provider {
        AiProvider::Gemini => {
            let api_key = config.get_api_key()?;
            Ok(Arc::new(GeminiTransport::new(
                &config.endpoint,
                &config.model,
                &api_key,
                Duration::from_secs(config.timeout_seconds),
            )?))
        }
        provider => {
            let command = provider
                .command_name()
                .ok_or_else(|| ClassifierError::Config(format!("未対応のプロバイダ: {}", provider)))?;
            Ok(Arc::new(
                CliTransport::new(provider, command)
                    .with_timeout(Duration::from_secs(config.timeout_seconds)),
            ))
        }
    }
}

/// Gemini HTTP API
pub struct GeminiTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl GeminiTransport {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::ApiCall(format!("HTTPクライアント初期化エラー: {}", e)))?;

        Ok(Self {
            client,
            url: endpoint.replace("{model}", model),
            api_key: api_key.to_string(),
        })
    }

    fn request_body(prompt: &str) -> Value {
        json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": {
                "temperature": 0.1,
                "responseMimeType": "application/json"
            }
        })
    }
}

/// generateContent のレスポンスから本文テキストを取り出す
pub fn extract_gemini_text(payload: &Value) -> std::result::Result<String, OracleError> {
    if let Some(message) = payload["error"]["message"].as_str() {
        return Err(OracleError::Transport(message.to_string()));
    }

    let parts = payload["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| OracleError::Parse("candidates[0].content.parts がありません".into()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(OracleError::Parse("応答テキストが空です".into()));
    }
    Ok(text)
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, OracleError> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let preview: String = text.chars().take(300).collect();
            return Err(OracleError::Transport(format!("HTTP {}: {}", status, preview)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        extract_gemini_text(&payload)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// ローカル AI CLI
pub struct CliTransport {
    provider: AiProvider,
    command: &'static str,
    timeout: Duration,
}

impl CliTransport {
    pub fn new(provider: AiProvider, command: &'static str) -> Self {
        Self {
            provider,
            command,
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECONDS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args<'a>(&self, prompt: &'a str) -> Vec<&'a str> {
        match self.provider {
            AiProvider::Codex => vec!["exec", prompt],
            _ => vec!["-p", prompt, "--output-format", "text"],
        }
    }
}

/// 子プロセスを実行し、時間切れならプロセスを止めて Transport エラーにする
async fn run_with_timeout(
    mut command: tokio::process::Command,
    label: &str,
    timeout: Duration,
) -> std::result::Result<std::process::Output, OracleError> {
    command.kill_on_drop(true);
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(output) => output.map_err(|e| OracleError::Transport(format!("{} CLI実行エラー: {}", label, e))),
        Err(_) => Err(OracleError::Transport(format!(
            "{} CLI timed out after {}s",
            label,
            timeout.as_secs()
        ))),
    }
}

#[async_trait]
impl Transport for CliTransport {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, OracleError> {
        // Windowsではcmd /c経由（改行はスペースに置換して渡す）
        #[cfg(windows)]
        let command = {
            let flat = prompt.replace('\n', " ").replace('"', "\\\"");
            let mut args = vec!["/c", self.command];
            args.extend(self.args(&flat));
            let mut command = tokio::process::Command::new("cmd");
            command.args(&args);
            command
        };

        #[cfg(not(windows))]
        let command = {
            let mut command = tokio::process::Command::new(self.command);
            command.args(self.args(prompt));
            command
        };

        let output = run_with_timeout(command, self.command, self.timeout).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::Transport(format!(
                "{} CLI failed (code {:?}): {}",
                self.command,
                output.status.code(),
                stderr.trim()
            )));
        }

        let response = String::from_utf8_lossy(&output.stdout).to_string();
        tracing::debug!(
            transport = self.command,
            response_len = response.len(),
            "CLI応答を受信"
        );
        Ok(response)
    }

    fn name(&self) -> &str {
        self.command
    }
}
