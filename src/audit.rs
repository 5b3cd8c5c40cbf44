//! 監査ログモジュール
//!
//! 分類の失敗・補正・あいまいなケースを追記専用で記録する。
//! 書き込みは投げっぱなしで、失敗しても呼び出し元へは伝播させず
//! tracing のエラーとして報告するだけにする。
//!
//! ファイル形式（1行1レコードのJSON）:
//! - failed_categorizations.jsonl: {description, productId?, context?, error_message?, attempted_category?, timestamp}
//! - category_corrections.jsonl: {description, original, corrected|null, alternatives, confidence, reason, timestamp}
//! - ambiguous_classifications.jsonl: {description, productId?, detail, timestamp}
//! - near_misses.jsonl: {product_text, best_match, score, timestamp}

use grocery_classifier_common::{Product, Triple};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const FAILURE_LOG: &str = "failed_categorizations.jsonl";
pub const CORRECTION_LOG: &str = "category_corrections.jsonl";
pub const AMBIGUOUS_LOG: &str = "ambiguous_classifications.jsonl";
pub const NEAR_MISS_LOG: &str = "near_misses.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Failure,
    Correction,
    Ambiguous,
}

/// 補正の確信度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// レコード種別ごとの詳細
#[derive(Debug, Clone, PartialEq)]
pub enum AuditDetail {
    Failure {
        context: Option<String>,
        error_message: Option<String>,
        attempted_category: Option<Triple>,
    },
    /// corrected が None なら未補正（人手確認待ち）
    Correction {
        original: Triple,
        corrected: Option<Triple>,
        alternatives: Vec<String>,
        confidence: Confidence,
        reason: String,
    },
    Ambiguous {
        detail: String,
    },
    NearMiss {
        best_match: String,
        score: f64,
    },
}

/// 監査レコード
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub description: String,
    pub product_id: Option<String>,
    pub detail: AuditDetail,
    pub timestamp: String,
}

impl AuditRecord {
    fn now(product: &Product, detail: AuditDetail) -> Self {
        Self {
            description: product.description.clone(),
            product_id: product.product_id.clone(),
            detail,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn failure(
        product: &Product,
        context: &str,
        error_message: Option<String>,
        attempted_category: Option<Triple>,
    ) -> Self {
        Self::now(
            product,
            AuditDetail::Failure {
                context: Some(context.to_string()),
                error_message,
                attempted_category,
            },
        )
    }

    pub fn correction(
        product: &Product,
        original: Triple,
        corrected: Option<Triple>,
        alternatives: Vec<String>,
        confidence: Confidence,
        reason: &str,
    ) -> Self {
        Self::now(
            product,
            AuditDetail::Correction {
                original,
                corrected,
                alternatives,
                confidence,
                reason: reason.to_string(),
            },
        )
    }

    pub fn ambiguous(product: &Product, detail: impl Into<String>) -> Self {
        Self::now(product, AuditDetail::Ambiguous { detail: detail.into() })
    }

    pub fn near_miss(product_text: &str, best_match: &str, score: f64) -> Self {
        Self {
            description: product_text.to_string(),
            product_id: None,
            detail: AuditDetail::NearMiss {
                best_match: best_match.to_string(),
                score,
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn product_ref(&self) -> &str {
        match &self.product_id {
            Some(id) if !id.is_empty() => id,
            _ => &self.description,
        }
    }

    pub fn kind(&self) -> AuditKind {
        match &self.detail {
            AuditDetail::Failure { .. } => AuditKind::Failure,
            AuditDetail::Correction { corrected: Some(_), .. } => AuditKind::Correction,
            AuditDetail::Correction { corrected: None, .. } => AuditKind::Ambiguous,
            AuditDetail::Ambiguous { .. } | AuditDetail::NearMiss { .. } => AuditKind::Ambiguous,
        }
    }

    /// 書き込み先ファイル名とJSON行
    fn to_line(&self) -> serde_json::Result<(&'static str, String)> {
        match &self.detail {
            AuditDetail::Failure { context, error_message, attempted_category } => {
                let line = FailureLine {
                    description: self.description.clone(),
                    product_id: self.product_id.clone(),
                    context: context.clone(),
                    error_message: error_message.clone(),
                    attempted_category: attempted_category.clone(),
                    timestamp: self.timestamp.clone(),
                };
                Ok((FAILURE_LOG, serde_json::to_string(&line)?))
            }
            AuditDetail::Correction { original, corrected, alternatives, confidence, reason } => {
                let line = CorrectionLine {
                    description: self.description.clone(),
                    original: original.clone(),
                    corrected: corrected.clone(),
                    alternatives: alternatives.clone(),
                    confidence: *confidence,
                    reason: reason.clone(),
                    timestamp: self.timestamp.clone(),
                };
                Ok((CORRECTION_LOG, serde_json::to_string(&line)?))
            }
            AuditDetail::Ambiguous { detail } => {
                let line = AmbiguityLine {
                    description: self.description.clone(),
                    product_id: self.product_id.clone(),
                    detail: detail.clone(),
                    timestamp: self.timestamp.clone(),
                };
                Ok((AMBIGUOUS_LOG, serde_json::to_string(&line)?))
            }
            AuditDetail::NearMiss { best_match, score } => {
                let line = NearMissLine {
                    product_text: self.description.clone(),
                    best_match: best_match.clone(),
                    score: *score,
                    timestamp: self.timestamp.clone(),
                };
                Ok((NEAR_MISS_LOG, serde_json::to_string(&line)?))
            }
        }
    }
}

/// failed_categorizations.jsonl の1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureLine {
    pub description: String,
    #[serde(rename = "productId", default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_category: Option<Triple>,
    pub timestamp: String,
}

/// category_corrections.jsonl の1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionLine {
    pub description: String,
    pub original: Triple,
    pub corrected: Option<Triple>,
    pub alternatives: Vec<String>,
    pub confidence: Confidence,
    pub reason: String,
    pub timestamp: String,
}

/// ambiguous_classifications.jsonl の1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityLine {
    pub description: String,
    #[serde(rename = "productId", default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub detail: String,
    pub timestamp: String,
}

/// near_misses.jsonl の1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearMissLine {
    pub product_text: String,
    pub best_match: String,
    pub score: f64,
    pub timestamp: String,
}

/// 種別ごとの件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub failures: usize,
    pub corrections: usize,
    pub ambiguous: usize,
}

enum Sink {
    Files { dir: PathBuf, lock: Mutex<()> },
    Memory(Mutex<Vec<AuditRecord>>),
}

/// 追記専用の監査ログ
pub struct AuditLog {
    sink: Sink,
    failures: AtomicUsize,
    corrections: AtomicUsize,
    ambiguous: AtomicUsize,
}

impl AuditLog {
    /// 指定ディレクトリの .jsonl ファイルに追記する
    pub fn to_dir(dir: &Path) -> Self {
        Self::with_sink(Sink::Files {
            dir: dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    /// メモリ上に保持する（テスト・ドライラン用）
    pub fn in_memory() -> Self {
        Self::with_sink(Sink::Memory(Mutex::new(Vec::new())))
    }

    fn with_sink(sink: Sink) -> Self {
        Self {
            sink,
            failures: AtomicUsize::new(0),
            corrections: AtomicUsize::new(0),
            ambiguous: AtomicUsize::new(0),
        }
    }

    /// レコードを追記する。エラーは返さない。
    pub fn append(&self, record: AuditRecord) {
        match record.kind() {
            AuditKind::Failure => self.failures.fetch_add(1, Ordering::Relaxed),
            AuditKind::Correction => self.corrections.fetch_add(1, Ordering::Relaxed),
            AuditKind::Ambiguous => self.ambiguous.fetch_add(1, Ordering::Relaxed),
        };

        match &self.sink {
            Sink::Files { dir, lock } => {
                let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(e) = write_line(dir, &record) {
                    tracing::error!(
                        product = %record.product_ref(),
                        error = %e,
                        "監査ログの書き込みに失敗"
                    );
                }
            }
            Sink::Memory(records) => {
                records
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(record);
            }
        }
    }

    /// メモリ上のレコード（ファイル出力時は空）
    pub fn records(&self) -> Vec<AuditRecord> {
        match &self.sink {
            Sink::Memory(records) => records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            Sink::Files { .. } => Vec::new(),
        }
    }

    pub fn summary(&self) -> AuditSummary {
        AuditSummary {
            failures: self.failures.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            ambiguous: self.ambiguous.load(Ordering::Relaxed),
        }
    }
}

fn write_line(dir: &Path, record: &AuditRecord) -> std::io::Result<()> {
    let (file_name, line) = record.to_line()?;
    std::fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(file_name))?;
    file.write_all(format!("{}\n", line).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn product() -> Product {
        Product::new(Some("0001"), "Silk Almond Milk")
    }

    #[test]
    fn test_kind_from_detail() {
        let p = product();
        let t = Triple::new("Produce", "Cheese", "Cheddar");
        assert_eq!(AuditRecord::failure(&p, "batch 1", None, None).kind(), AuditKind::Failure);
        assert_eq!(
            AuditRecord::correction(&p, t.clone(), Some(t.clone()), vec![], Confidence::High, "x").kind(),
            AuditKind::Correction
        );
        assert_eq!(
            AuditRecord::correction(&p, t, None, vec![], Confidence::Low, "x").kind(),
            AuditKind::Ambiguous
        );
        assert_eq!(AuditRecord::near_miss("a", "b", 70.0).kind(), AuditKind::Ambiguous);
    }

    #[test]
    fn test_in_memory_log() {
        let log = AuditLog::in_memory();
        log.append(AuditRecord::ambiguous(&product(), "padded"));
        log.append(AuditRecord::failure(&product(), "batch 2", Some("timeout".into()), None));

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].product_ref(), "0001");
        assert_eq!(log.summary(), AuditSummary { failures: 1, corrections: 0, ambiguous: 1 });
    }

    #[test]
    fn test_file_log_formats() {
        let dir = tempdir().expect("Failed to create temp dir");
        let log = AuditLog::to_dir(dir.path());

        log.append(AuditRecord::failure(
            &product(),
            "batch 1 failed after 5 attempts",
            Some("connection refused".into()),
            None,
        ));
        log.append(AuditRecord::correction(
            &product(),
            Triple::new("Produce", "Cheese", "Cheddar"),
            Some(Triple::new("Dairy & Eggs", "Cheese", "Cheddar")),
            vec!["Dairy & Eggs".into()],
            Confidence::High,
            "fixed_category_hierarchy",
        ));

        let failures = std::fs::read_to_string(dir.path().join(FAILURE_LOG)).unwrap();
        let line: FailureLine = serde_json::from_str(failures.lines().next().unwrap()).unwrap();
        assert_eq!(line.description, "Silk Almond Milk");
        assert_eq!(line.product_id.as_deref(), Some("0001"));
        assert_eq!(line.error_message.as_deref(), Some("connection refused"));

        let corrections = std::fs::read_to_string(dir.path().join(CORRECTION_LOG)).unwrap();
        let value: serde_json::Value = serde_json::from_str(corrections.trim()).unwrap();
        assert_eq!(value["confidence"], "high");
        assert_eq!(value["reason"], "fixed_category_hierarchy");
        assert_eq!(value["corrected"]["category"], "Dairy & Eggs");
    }

    #[test]
    fn test_uncorrected_serializes_null() {
        let dir = tempdir().expect("Failed to create temp dir");
        let log = AuditLog::to_dir(dir.path());
        log.append(AuditRecord::correction(
            &product(),
            Triple::new("Produce", "Milk", "Oat Milk"),
            None,
            vec!["Beverages".into(), "Dairy & Eggs".into()],
            Confidence::Low,
            "multiple_possible_categories",
        ));

        let content = std::fs::read_to_string(dir.path().join(CORRECTION_LOG)).unwrap();
        let value: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert!(value["corrected"].is_null());
        assert_eq!(value["alternatives"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_append_never_fails() {
        // ディレクトリを置くべき場所にファイルがあり書き込めない
        let dir = tempdir().expect("Failed to create temp dir");
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();

        let log = AuditLog::to_dir(&blocker);
        log.append(AuditRecord::ambiguous(&product(), "should not panic"));
        assert_eq!(log.summary().ambiguous, 1);
    }
}
