//! 仕入先カテゴリ → タクソノミーカテゴリの候補表
//!
//! 商品に付いている仕入先側のカテゴリ名（小文字で照合）から、
//! 分類先になり得るタクソノミーカテゴリを絞り込む。結果はプロンプトの
//! ヒントとして渡すだけで、検証には使わない。

use crate::error::Result;
use crate::taxonomy::Taxonomy;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// 組み込みの候補表（仕入先カテゴリ, 候補カテゴリ）
const BUILTIN: &[(&str, &[&str])] = &[
    ("produce", &["Produce"]),
    ("snacks", &["Snacks & Candy", "Prepared Foods", "Breakfast"]),
    (
        "canned & packaged",
        &["Canned Goods & Soups", "Dry Goods & Pasta", "Condiments & Sauces", "Prepared Foods"],
    ),
    (
        "meat & seafood",
        &["Meat & Seafood", "Canned Goods & Soups", "Prepared Foods", "Frozen"],
    ),
    ("frozen", &["Frozen"]),
    (
        "baking goods",
        &["Baking Essentials", "Oils, Vinegars, & Spices", "Snacks & Candy", "Beverages"],
    ),
    ("beverages", &["Beverages", "Hard Beverages"]),
    ("dairy", &["Dairy & Eggs", "Beverages", "Baking Essentials", "Snacks & Candy"]),
    ("candy", &["Snacks & Candy"]),
    ("bakery", &["Bakery", "Breakfast", "Snacks & Candy"]),
    ("baby", &["Baby", "Snacks & Candy", "Personal Care", "Beverages"]),
    (
        "deli",
        &["Deli", "Prepared Foods", "Bakery", "Snacks & Candy", "Condiments & Sauces"],
    ),
    ("cleaning products", &["Household"]),
    (
        "breakfast",
        &["Breakfast", "Bakery", "Frozen", "Prepared Foods", "Beverages"],
    ),
    (
        "adult beverage",
        &["Wine", "Beer", "Liquor", "Hard Beverages", "Beverages"],
    ),
    ("pet care", &["Pets"]),
    ("personal care", &["Personal Care"]),
    ("home decor", &["Household", "Miscellaneous"]),
    ("health", &["Health Care", "Snacks & Candy"]),
    ("kitchen", &["Kitchen Supplies"]),
    ("beauty", &["Personal Care"]),
    ("garden & patio", &["Miscellaneous", "Household"]),
    ("electronics", &["Miscellaneous"]),
    (
        "condiment & sauces",
        &["Condiments & Sauces", "Oils, Vinegars, & Spices", "Snacks & Candy"],
    ),
    ("floral", &["Floral"]),
    (
        "pasta, sauces, grain",
        &["Dry Goods & Pasta", "Condiments & Sauces", "Canned Goods & Soups"],
    ),
    ("party", &["Party & Gift Supplies"]),
    ("office, school, & crafts", &["Office & Craft"]),
    ("apparel", &["Miscellaneous"]),
    ("entertainment", &["Miscellaneous"]),
    ("automotive", &["Miscellaneous"]),
    ("sporting goods", &["Miscellaneous"]),
    ("hardware", &["Miscellaneous"]),
    ("bed & bath", &["Miscellaneous"]),
    (
        "international",
        &["Oils, Vinegars, & Spices", "Condiments & Sauces", "Produce", "Dry Goods & Pasta"],
    ),
];

/// 仕入先カテゴリの候補表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryConstraints {
    table: HashMap<String, Vec<String>>,
}

impl CategoryConstraints {
    /// 組み込みの候補表
    pub fn builtin() -> Self {
        let table = BUILTIN
            .iter()
            .map(|(source, targets)| {
                (
                    source.to_string(),
                    targets.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect();
        Self { table }
    }

    /// JSONファイル（仕入先カテゴリ → 候補カテゴリ配列）から読み込む
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(content)?;
        let table = raw
            .into_iter()
            .map(|(source, targets)| (source.trim().to_lowercase(), targets))
            .collect();
        Ok(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// 仕入先カテゴリから候補カテゴリを求める
    ///
    /// タクソノミーにないカテゴリは除き、タクソノミーの並び順で返す。
    /// 該当がなければ空（ヒントなし）。
    pub fn candidates(&self, source_categories: &[String], taxonomy: &Taxonomy) -> Vec<String> {
        let wanted: HashSet<&str> = source_categories
            .iter()
            .filter_map(|source| self.table.get(&source.trim().to_lowercase()))
            .flatten()
            .map(|s| s.as_str())
            .collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        taxonomy
            .categories()
            .iter()
            .filter(|c| wanted.contains(c.name.as_str()))
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_json_str(
            r#"[
              {"name": "Produce", "subcategories": [{"name": "Fresh Fruit"}]},
              {"name": "Dairy & Eggs", "subcategories": [{"name": "Milk"}]},
              {"name": "Beverages", "subcategories": [{"name": "Juice"}]},
              {"name": "Snacks & Candy", "subcategories": [{"name": "Chips"}]}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_candidates_follow_taxonomy_order() {
        let constraints = CategoryConstraints::builtin();
        let out = constraints.candidates(&["Dairy".into(), "produce".into()], &taxonomy());
        // Baking Essentials はタクソノミーにないので落ちる
        assert_eq!(out, vec!["Produce", "Dairy & Eggs", "Beverages", "Snacks & Candy"]);
    }

    #[test]
    fn test_unknown_source_category_gives_no_hint() {
        let constraints = CategoryConstraints::builtin();
        assert!(constraints.candidates(&["Seasonal".into()], &taxonomy()).is_empty());
        assert!(constraints.candidates(&[], &taxonomy()).is_empty());
    }

    #[test]
    fn test_from_json_str_lowercases_keys() {
        let constraints =
            CategoryConstraints::from_json_str(r#"{"Frozen Treats": ["Snacks & Candy"]}"#).unwrap();
        assert_eq!(constraints.len(), 1);
        let out = constraints.candidates(&["frozen treats".into()], &taxonomy());
        assert_eq!(out, vec!["Snacks & Candy"]);
    }
}
