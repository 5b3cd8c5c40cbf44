//! 失敗ログ → レビュー用レポート変換
//!
//! failed_categorizations.jsonl の各行を管理者レビュー用の
//! reported_categorizations.jsonl 形式に変換して追記し、失敗ログを空にする。
//! 既にレポート済みの商品名はスキップする。

use crate::audit::{FailureLine, FAILURE_LOG};
use crate::error::Result;
use grocery_classifier_common::{Triple, UNKNOWN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const REPORT_LOG: &str = "reported_categorizations.jsonl";

const SYSTEM_NOTE: &str = "System-detected categorization failure";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedProduct {
    pub name: String,
    pub category: String,
    pub subcategory: String,
    pub product_type: String,
}

/// レビュー用レポート（1行分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    pub product: ReportedProduct,
    pub current_category: Triple,
    /// 管理者が入力する
    pub suggested_category: Option<Triple>,
    pub notes: String,
    pub timestamp: String,
    pub status: String,
    pub source: String,
}

impl ReviewReport {
    pub fn from_failure(failure: &FailureLine) -> Self {
        let current = failure
            .attempted_category
            .clone()
            .unwrap_or_else(|| Triple::new(UNKNOWN, UNKNOWN, UNKNOWN));
        let notes = match &failure.context {
            Some(context) => format!("{}: {}", SYSTEM_NOTE, context),
            None => SYSTEM_NOTE.to_string(),
        };

        Self {
            product: ReportedProduct {
                name: failure.description.clone(),
                category: current.category.clone(),
                subcategory: current.subcategory.clone(),
                product_type: current.product_type.clone(),
            },
            current_category: current,
            suggested_category: None,
            notes,
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: "pending".into(),
            source: "system".into(),
        }
    }
}

/// 変換中の失敗ログに付ける拡張子
const PROCESSING_SUFFIX: &str = ".processing";

/// 失敗ログをレポートに変換し、変換件数を返す
///
/// 失敗ログは先に処理用ファイルへ rename してから読む。並行して走る
/// パイプラインの追記は新しい失敗ログに入り、変換で消えることはない。
/// 前回途中で止まった処理用ファイルが残っていれば一緒に変換する。
pub fn convert_failures_to_reports(dir: &Path) -> Result<usize> {
    let failures_path = dir.join(FAILURE_LOG);
    let reports_path = dir.join(REPORT_LOG);

    if failures_path.exists() {
        let claimed = dir.join(format!(
            "{}.{}.{}{}",
            FAILURE_LOG,
            std::process::id(),
            chrono::Utc::now().format("%Y%m%d%H%M%S%f"),
            PROCESSING_SUFFIX
        ));
        std::fs::rename(&failures_path, &claimed)?;
    }

    let claimed = processing_files(dir)?;
    if claimed.is_empty() {
        tracing::warn!(path = %failures_path.display(), "失敗ログがありません");
        return Ok(0);
    }

    let mut reported = existing_report_names(&reports_path);
    let mut new_reports = Vec::new();
    for path in &claimed {
        let content = std::fs::read_to_string(path)?;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let failure: FailureLine = match serde_json::from_str(line) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(file = %path.display(), line = line_no + 1, error = %e, "失敗ログの行を読めません");
                    continue;
                }
            };
            if !reported.insert(failure.description.clone()) {
                continue;
            }
            new_reports.push(ReviewReport::from_failure(&failure));
        }
    }

    if !new_reports.is_empty() {
        let mut out = String::new();
        for report in &new_reports {
            out.push_str(&serde_json::to_string(report)?);
            out.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&reports_path)?;
        file.write_all(out.as_bytes())?;
    }

    // レポートを書き終えてから処理用ファイルを消す
    for path in &claimed {
        std::fs::remove_file(path)?;
    }

    tracing::info!(converted = new_reports.len(), files = claimed.len(), "失敗ログをレポートに変換");
    Ok(new_reports.len())
}

/// 変換待ちの処理用ファイル（名前順）
fn processing_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_claimed = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FAILURE_LOG) && n.ends_with(PROCESSING_SUFFIX));
        if is_claimed {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn existing_report_names(path: &Path) -> HashSet<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return HashSet::new();
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|report| report["product"]["name"].as_str().map(|s| s.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_from_failure_with_attempt() {
        let failure = FailureLine {
            description: "Mystery Snack".into(),
            product_id: None,
            context: Some("invalid_product_type".into()),
            error_message: None,
            attempted_category: Some(Triple::new("Snacks", "Chips", "Kettle Chips")),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let report = ReviewReport::from_failure(&failure);
        assert_eq!(report.product.category, "Snacks");
        assert_eq!(report.current_category.product_type, "Kettle Chips");
        assert_eq!(report.status, "pending");
        assert!(report.notes.ends_with("invalid_product_type"));

        let value = serde_json::to_value(&report).unwrap();
        assert!(value["suggestedCategory"].is_null());
        assert_eq!(value["currentCategory"]["subcategory"], "Chips");
    }

    fn failure_line(description: &str) -> String {
        let line = FailureLine {
            description: description.into(),
            product_id: None,
            context: Some("batch 1/1 failed".into()),
            error_message: None,
            attempted_category: None,
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        format!("{}\n", serde_json::to_string(&line).unwrap())
    }

    #[test]
    fn test_append_after_conversion_starts_fresh_log() {
        let dir = tempfile::tempdir().unwrap();
        let failures = dir.path().join(FAILURE_LOG);
        std::fs::write(&failures, failure_line("Mystery Snack")).unwrap();

        assert_eq!(convert_failures_to_reports(dir.path()).unwrap(), 1);
        // 変換後の追記は新しいファイルに入る
        assert!(!failures.exists());
        let log = crate::audit::AuditLog::to_dir(dir.path());
        log.append(crate::audit::AuditRecord::failure(
            &grocery_classifier_common::Product::new(None, "Odd Gadget"),
            "batch 1/1 failed",
            None,
            None,
        ));
        assert!(failures.exists());
        assert_eq!(convert_failures_to_reports(dir.path()).unwrap(), 1);
        assert!(processing_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_leftover_processing_file_is_converted() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir
            .path()
            .join(format!("{}.1.20260101000000000000{}", FAILURE_LOG, PROCESSING_SUFFIX));
        std::fs::write(&leftover, failure_line("Mystery Snack")).unwrap();
        std::fs::write(dir.path().join(FAILURE_LOG), failure_line("Odd Gadget")).unwrap();

        assert_eq!(convert_failures_to_reports(dir.path()).unwrap(), 2);
        assert!(!leftover.exists());
        assert!(!dir.path().join(FAILURE_LOG).exists());
    }

    #[test]
    fn test_report_without_attempt_is_unknown() {
        let failure = FailureLine {
            description: "Mystery Snack".into(),
            product_id: None,
            context: None,
            error_message: Some("timeout".into()),
            attempted_category: None,
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let report = ReviewReport::from_failure(&failure);
        assert_eq!(report.current_category, Triple::new("Unknown", "Unknown", "Unknown"));
        assert_eq!(report.notes, SYSTEM_NOTE);
    }
}
