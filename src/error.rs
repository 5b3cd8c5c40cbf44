use crate::oracle::OracleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIキーが設定されていません。`grocery-classifier config --set-api-key YOUR_KEY` または GEMINI_API_KEY で設定してください")]
    MissingApiKey,

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("タクソノミー読み込みエラー: {0}")]
    Taxonomy(#[from] grocery_classifier_common::Error),

    #[error("不正な分類: {0}")]
    InvalidTriple(String),

    #[error("API呼び出しエラー: {0}")]
    ApiCall(String),

    #[error("オラクルエラー: {0}")]
    Oracle(#[from] OracleError),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
