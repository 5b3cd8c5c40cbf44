use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// 分類オラクルのバックエンド
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// Gemini HTTP API
    #[default]
    Gemini,
    /// ローカルの claude CLI
    Claude,
    /// ローカルの codex CLI
    Codex,
}

impl AiProvider {
    /// CLIバックエンドのコマンド名（HTTPバックエンドは None）
    pub fn command_name(&self) -> Option<&'static str> {
        match self {
            AiProvider::Gemini => None,
            AiProvider::Claude => Some("claude"),
            AiProvider::Codex => Some("codex"),
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Gemini => write!(f, "gemini"),
            AiProvider::Claude => write!(f, "claude"),
            AiProvider::Codex => write!(f, "codex"),
        }
    }
}
