//! あいまい一致の惜しい候補の集計
//!
//! near_misses.jsonl を最近 N 日分に絞って best_match ごとにまとめ、
//! 一定回数以上出てきたものを修正マップへの追加候補として返す。
//! 人手の承認フロー（approve）に渡す前の下調べ用。

use crate::audit::{NearMissLine, NEAR_MISS_LOG};
use crate::corrections::CorrectionMap;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use grocery_classifier_common::{Triple, UNKNOWN};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

pub const DEFAULT_MIN_OCCURRENCES: usize = 3;
pub const DEFAULT_DAYS: i64 = 30;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "with", "in", "on", "at", "of", "to", "for",
];

/// 修正マップへの追加候補
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearMissSuggestion {
    /// 既存の修正マップキー（惜しくも届かなかった一致先）
    pub correction_key: String,
    /// そのキーに登録済みの分類（なければ Unknown）
    pub category_info: Triple,
    pub variants: Vec<String>,
    pub average_score: f64,
    pub count: usize,
    pub suggested_keys: Vec<String>,
}

/// 集計条件
#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    pub min_occurrences: usize,
    /// 0 以下なら期間で絞らない
    pub days: i64,
    pub now: DateTime<Utc>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            min_occurrences: DEFAULT_MIN_OCCURRENCES,
            days: DEFAULT_DAYS,
            now: Utc::now(),
        }
    }
}

/// 惜しい候補を集計して、出現回数の多い順に返す
pub fn analyze_near_misses(
    dir: &Path,
    corrections: &CorrectionMap,
    options: AnalysisOptions,
) -> Result<Vec<NearMissSuggestion>> {
    let path = dir.join(NEAR_MISS_LOG);
    if !path.exists() {
        tracing::warn!(path = %path.display(), "near miss ログがありません");
        return Ok(Vec::new());
    }

    let cutoff = (options.days > 0).then(|| options.now - Duration::days(options.days));
    let content = std::fs::read_to_string(&path)?;

    let mut groups: BTreeMap<String, Vec<NearMissLine>> = BTreeMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(miss) = serde_json::from_str::<NearMissLine>(line) else {
            continue;
        };
        if let Some(cutoff) = cutoff {
            match DateTime::parse_from_rfc3339(&miss.timestamp) {
                Ok(at) if at.with_timezone(&Utc) >= cutoff => {}
                _ => continue,
            }
        }
        groups.entry(miss.best_match.clone()).or_default().push(miss);
    }

    let mut suggestions: Vec<NearMissSuggestion> = groups
        .into_iter()
        .filter(|(_, items)| items.len() >= options.min_occurrences.max(1))
        .map(|(key, items)| {
            let variants: Vec<String> = items.iter().map(|m| m.product_text.clone()).collect();
            let average_score = items.iter().map(|m| m.score).sum::<f64>() / items.len() as f64;
            NearMissSuggestion {
                category_info: corrections
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| Triple::new(UNKNOWN, UNKNOWN, UNKNOWN)),
                suggested_keys: suggest_pattern_keys(&variants),
                correction_key: key,
                average_score,
                count: items.len(),
                variants,
            }
        })
        .collect();

    // 件数の多い順（同数はキー順のまま）
    suggestions.sort_by(|a, b| b.count.cmp(&a.count));
    Ok(suggestions)
}

/// 表記ゆれの共通語から新しいキーを提案する
///
/// 半数以上の表記に出てくる語（3文字以上、ストップワード除く）を多い順に
/// 最大3語取り、2語以上なら連結したものと、最頻の1語を返す。
pub fn suggest_pattern_keys(texts: &[String]) -> Vec<String> {
    if texts.is_empty() {
        return Vec::new();
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        let words: HashSet<String> = text
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(w))
            .map(|w| w.to_string())
            .collect();
        for word in words {
            *counts.entry(word).or_default() += 1;
        }
    }

    let mut common: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| count * 2 >= texts.len())
        .collect();
    common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top: Vec<String> = common.into_iter().take(3).map(|(w, _)| w).collect();

    let mut keys = Vec::new();
    if top.len() >= 2 {
        keys.push(top.join(" "));
    }
    if let Some(first) = top.first() {
        keys.push(first.clone());
    }
    keys
}
