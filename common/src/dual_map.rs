//! 二重カテゴリ（クロスリスト）マップ
//!
//! (カテゴリ, サブカテゴリ) ごとに、商品を別カテゴリにも掲載する規則を保持する。
//! 規則は A → B, B → A のように循環してよい。評価は常に1ホップのみで、
//! 評価結果をさらに規則へ通すことはしない。

use crate::error::{Error, Result};
use crate::taxonomy::Taxonomy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 全商品タイプにマッチするワイルドカードキー
pub const WILDCARD: &str = "ALL";

/// 二重カテゴリ規則
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualCategoryRule {
    /// 商品タイプ（または "ALL"）→ 掲載先サブカテゴリ
    pub product_type_to_subcategory: BTreeMap<String, String>,
    /// 掲載先カテゴリ
    pub dual_category: String,
    /// 商品タイプ別の掲載先カテゴリ上書き
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dual_category_overrides: BTreeMap<String, String>,
}

/// どの規則行でマッチしたか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch {
    ProductType,
    Wildcard,
}

/// 規則の評価結果（商品タイプは未決定）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualTarget {
    pub category: String,
    pub subcategory: String,
    pub matched: RuleMatch,
}

impl DualCategoryRule {
    /// 商品タイプ一致 → "ALL" → 上書き適用 の順で評価する
    pub fn evaluate(&self, product_type: &str) -> Option<DualTarget> {
        let (subcategory, matched) = match self.product_type_to_subcategory.get(product_type) {
            Some(sub) => (sub, RuleMatch::ProductType),
            None => (
                self.product_type_to_subcategory.get(WILDCARD)?,
                RuleMatch::Wildcard,
            ),
        };

        let category = self
            .dual_category_overrides
            .get(product_type)
            .unwrap_or(&self.dual_category);

        Some(DualTarget {
            category: category.clone(),
            subcategory: subcategory.clone(),
            matched,
        })
    }
}

/// 二重カテゴリマップ全体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DualCategoryMap {
    rules: BTreeMap<String, BTreeMap<String, DualCategoryRule>>,
}

impl DualCategoryMap {
    /// JSONファイルから読み込み
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// JSON文字列から読み込み
    pub fn from_json_str(content: &str) -> Result<Self> {
        let map: Self = serde_json::from_str(content)
            .map_err(|e| Error::DualMap(format!("failed to parse dual category map: {}", e)))?;

        for (category, subs) in &map.rules {
            for (subcategory, rule) in subs {
                if rule.dual_category.trim().is_empty() {
                    return Err(Error::DualMap(format!(
                        "rule {}/{} has an empty dual_category",
                        category, subcategory
                    )));
                }
            }
        }

        Ok(map)
    }

    pub fn rule(&self, category: &str, subcategory: &str) -> Option<&DualCategoryRule> {
        self.rules.get(category)?.get(subcategory)
    }

    /// 1ホップだけ評価する
    pub fn evaluate(&self, category: &str, subcategory: &str, product_type: &str) -> Option<DualTarget> {
        self.rule(category, subcategory)?.evaluate(product_type)
    }

    /// 規則件数
    pub fn len(&self) -> usize {
        self.rules.values().map(|subs| subs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// タクソノミーに存在しない参照元・参照先を列挙する
    pub fn check_against(&self, taxonomy: &Taxonomy) -> Vec<String> {
        let mut problems = Vec::new();

        for (category, subs) in &self.rules {
            for (subcategory, rule) in subs {
                if !taxonomy.is_valid_subcategory(category, subcategory) {
                    problems.push(format!("source {}/{} is not in the taxonomy", category, subcategory));
                }

                for (product_type, target_sub) in &rule.product_type_to_subcategory {
                    let target_cat = rule
                        .dual_category_overrides
                        .get(product_type)
                        .unwrap_or(&rule.dual_category);
                    if !taxonomy.is_valid_subcategory(target_cat, target_sub) {
                        problems.push(format!(
                            "{}/{} [{}] targets {}/{} which is not in the taxonomy",
                            category, subcategory, product_type, target_cat, target_sub
                        ));
                    }
                }
            }
        }

        problems
    }
}
