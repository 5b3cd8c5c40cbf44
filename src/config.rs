use crate::ai_provider::AiProvider;
use crate::error::{ClassifierError, Result};
use crate::oracle::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 一括分類の最大バッチサイズ
pub const MAX_BATCH: usize = 20;

/// オラクル1回あたりのタイムアウト（HTTP・CLI共通）
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub provider: AiProvider,
    pub model: String,
    /// HTTPオラクルのエンドポイント（{model} はモデル名に置換）
    pub endpoint: String,
    pub timeout_seconds: u64,

    pub taxonomy_path: PathBuf,
    pub dual_map_path: PathBuf,
    pub correction_map_path: PathBuf,
    pub audit_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// 仕入先カテゴリの候補表（省略時は組み込み表）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_constraints_path: Option<PathBuf>,

    pub max_batch: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub inter_batch_delay_ms: u64,
    pub product_type_chunk_size: usize,
    pub product_type_base_delay_ms: u64,
    pub product_type_inter_chunk_delay_ms: u64,

    /// 修正マップのあいまい一致を使う
    pub fuzzy_match: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: AiProvider::Gemini,
            model: "gemini-2.0-flash".into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent".into(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            taxonomy_path: PathBuf::from("categories.json"),
            dual_map_path: PathBuf::from("dual_categories.json"),
            correction_map_path: PathBuf::from("correction_map.json"),
            audit_dir: PathBuf::from("."),
            cache_dir: PathBuf::from("."),
            category_constraints_path: None,
            max_batch: MAX_BATCH,
            max_retries: 5,
            base_delay_ms: 2000,
            inter_batch_delay_ms: 5000,
            product_type_chunk_size: 10,
            product_type_base_delay_ms: 1000,
            product_type_inter_chunk_delay_ms: 2000,
            fuzzy_match: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| ClassifierError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("grocery-classifier").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch == 0 {
            return Err(ClassifierError::Config("max_batch は1以上にしてください".into()));
        }
        if self.max_retries == 0 {
            return Err(ClassifierError::Config("max_retries は1以上にしてください".into()));
        }
        if self.product_type_chunk_size == 0 {
            return Err(ClassifierError::Config(
                "product_type_chunk_size は1以上にしてください".into(),
            ));
        }
        Ok(())
    }

    pub fn get_api_key(&self) -> Result<String> {
        // 環境変数を優先
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }

        self.api_key.clone().ok_or(ClassifierError::MissingApiKey)
    }

    pub fn set_api_key(&mut self, key: String) -> Result<()> {
        self.api_key = Some(key);
        self.save()
    }

    /// 一括分類のリトライ方針
    pub fn primary_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.inter_batch_delay_ms),
        )
    }

    /// 商品タイプのみ判定のリトライ方針（基本待ち時間が短い）
    pub fn product_type_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_retries,
            Duration::from_millis(self.product_type_base_delay_ms),
            Duration::from_millis(self.product_type_inter_chunk_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_batch, 20);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.product_type_chunk_size, 10);
        assert!(config.product_type_base_delay_ms < config.base_delay_ms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"provider": "claude", "max_batch": 8}"#).unwrap();
        assert_eq!(config.provider, AiProvider::Claude);
        assert_eq!(config.max_batch, 8);
        assert_eq!(config.inter_batch_delay_ms, 5000);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = Config {
            max_batch: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClassifierError::Config(_))));
    }

    #[test]
    fn test_backoff_policies() {
        let config = Config::default();
        let primary = config.primary_backoff();
        let product_type = config.product_type_backoff();
        assert_eq!(primary.max_attempts(), 5);
        assert_eq!(primary.inter_batch_delay(), Duration::from_secs(5));
        assert_eq!(product_type.inter_batch_delay(), Duration::from_secs(2));
        assert!(product_type.delay_for_attempt(1) < primary.delay_for_attempt(1));
    }
}
