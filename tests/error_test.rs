//! エラーケーステスト
//!
//! 各種エラー条件でのエラーハンドリングを検証

use grocery_classifier::config::Config;
use grocery_classifier::error::ClassifierError;
use grocery_classifier::oracle::{transport::from_config, OracleError};
use grocery_classifier::pipeline::Pipeline;
use grocery_classifier_common::Taxonomy;
use std::path::PathBuf;
use tempfile::tempdir;

/// ClassifierErrorのDisplay実装確認
#[test]
fn test_error_display() {
    let errors = vec![
        ClassifierError::Config("テスト設定エラー".to_string()),
        ClassifierError::FileNotFound("categories.json".to_string()),
        ClassifierError::InvalidTriple("Produce / Cheese / Cheddar".to_string()),
        ClassifierError::ApiCall("API呼び出し失敗".to_string()),
        ClassifierError::MissingApiKey,
    ];

    for err in errors {
        let display = format!("{}", err);
        assert!(!display.is_empty(), "エラーメッセージが空: {:?}", err);
    }
}

/// MissingApiKeyエラーのメッセージ確認
#[test]
fn test_missing_api_key_message() {
    let display = format!("{}", ClassifierError::MissingApiKey);
    assert!(display.contains("APIキー"));
    assert!(display.contains("GEMINI_API_KEY"));
}

/// IOエラーからの変換
#[test]
fn test_io_error_conversion() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let err: ClassifierError = io_err.into();

    assert!(matches!(err, ClassifierError::Io(_)));
    assert!(format!("{}", err).contains("IO"));
}

/// JSONエラーからの変換
#[test]
fn test_json_error_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("{ invalid }").unwrap_err();
    let err: ClassifierError = json_err.into();

    assert!(matches!(err, ClassifierError::JsonParse(_)));
}

/// common::Errorからの変換
#[test]
fn test_common_error_conversion() {
    let common_err = grocery_classifier_common::Error::Taxonomy("empty".to_string());
    let err: ClassifierError = common_err.into();

    assert!(matches!(err, ClassifierError::Taxonomy(_)));
    assert!(format!("{}", err).contains("empty"));
}

/// OracleErrorからの変換（試行回数と最後のエラーを保持）
#[test]
fn test_oracle_error_conversion() {
    let oracle_err = OracleError::RetriesExhausted {
        attempts: 5,
        last_error: "429 Too Many Requests".to_string(),
    };
    let err: ClassifierError = oracle_err.into();

    let display = format!("{}", err);
    assert!(display.contains('5'));
    assert!(display.contains("429"));
}

/// サブカテゴリのないカテゴリは読み込み時に拒否
#[test]
fn test_taxonomy_without_subcategories_is_fatal() {
    let result = Taxonomy::from_json_str(r#"[{"name": "Produce", "subcategories": []}]"#);
    assert!(result.is_err());
}

/// 壊れたタクソノミーではパイプラインを組み立てられない
#[test]
fn test_pipeline_refuses_broken_taxonomy() {
    let dir = tempdir().expect("Failed to create temp dir");
    let taxonomy_path = dir.path().join("categories.json");
    std::fs::write(&taxonomy_path, "{ not json").unwrap();

    let config = Config {
        provider: grocery_classifier::ai_provider::AiProvider::Claude,
        taxonomy_path,
        audit_dir: dir.path().to_path_buf(),
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let transport = from_config(&config).unwrap();
    let result = Pipeline::from_config(&config, transport);
    assert!(matches!(result, Err(ClassifierError::Taxonomy(_))));
}

/// タクソノミーファイルがない場合
#[test]
fn test_pipeline_missing_taxonomy() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = Config {
        provider: grocery_classifier::ai_provider::AiProvider::Codex,
        taxonomy_path: PathBuf::from("/nonexistent/path/categories.json"),
        audit_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let transport = from_config(&config).unwrap();
    let result = Pipeline::from_config(&config, transport);
    assert!(matches!(result, Err(ClassifierError::FileNotFound(_))));
}

/// 壊れた修正マップは読み込みエラー
#[test]
fn test_corrupt_correction_map() {
    use grocery_classifier::corrections::{CorrectionStore, JsonCorrectionStore};

    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("correction_map.json");
    std::fs::write(&path, "[1, 2").unwrap();

    let result = JsonCorrectionStore::new(&path).load();
    assert!(matches!(result, Err(ClassifierError::JsonParse(_))));
}
