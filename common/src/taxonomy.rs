//! 商品分類タクソノミーモジュール
//!
//! カテゴリ → サブカテゴリ → 商品タイプの固定階層を管理する。
//! JSONから一度だけ読み込み、以降は読み取り専用で参照する。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// サブカテゴリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub name: String,
    /// 商品タイプの内訳を持たない（商品タイプ = サブカテゴリ名）
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub grid_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_types: Vec<String>,
}

impl Subcategory {
    /// 商品タイプとしてサブカテゴリ名そのものを使うか
    ///
    /// gridOnly、または商品タイプが1件も宣言されていない場合。
    pub fn uses_own_name(&self) -> bool {
        self.grid_only || self.product_types.is_empty()
    }

    /// このサブカテゴリで有効な商品タイプ一覧
    pub fn valid_product_types(&self) -> Vec<&str> {
        if self.uses_own_name() {
            vec![self.name.as_str()]
        } else {
            self.product_types.iter().map(|s| s.as_str()).collect()
        }
    }

    pub fn accepts(&self, product_type: &str) -> bool {
        if self.uses_own_name() {
            product_type == self.name
        } else {
            self.product_types.iter().any(|pt| pt == product_type)
        }
    }

    /// フォールバック用の先頭商品タイプ
    pub fn first_product_type(&self) -> &str {
        if self.uses_own_name() {
            &self.name
        } else {
            &self.product_types[0]
        }
    }
}

/// カテゴリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub subcategories: Vec<Subcategory>,
}

/// タクソノミー全体
#[derive(Debug, Clone)]
pub struct Taxonomy {
    categories: Vec<Category>,
    /// カテゴリ名 → categories のインデックス
    category_index: HashMap<String, usize>,
    /// (カテゴリ名, サブカテゴリ名) → (カテゴリ, サブカテゴリ) のインデックス
    subcategory_index: HashMap<(String, String), (usize, usize)>,
}

impl Taxonomy {
    /// JSONファイルから読み込み
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// JSON文字列から読み込み
    pub fn from_json_str(content: &str) -> Result<Self> {
        let categories: Vec<Category> = serde_json::from_str(content)
            .map_err(|e| Error::Taxonomy(format!("failed to parse taxonomy: {}", e)))?;
        Self::from_categories(categories)
    }

    /// カテゴリ一覧から構築（構造検証つき）
    pub fn from_categories(categories: Vec<Category>) -> Result<Self> {
        if categories.is_empty() {
            return Err(Error::Taxonomy("taxonomy has no categories".into()));
        }

        let mut category_index = HashMap::new();
        let mut subcategory_index = HashMap::new();

        for (ci, category) in categories.iter().enumerate() {
            if category.subcategories.is_empty() {
                return Err(Error::Taxonomy(format!(
                    "category '{}' has no subcategories",
                    category.name
                )));
            }
            if category_index.insert(category.name.clone(), ci).is_some() {
                return Err(Error::Taxonomy(format!(
                    "duplicate category '{}'",
                    category.name
                )));
            }

            for (si, sub) in category.subcategories.iter().enumerate() {
                let key = (category.name.clone(), sub.name.clone());
                if subcategory_index.insert(key, (ci, si)).is_some() {
                    return Err(Error::Taxonomy(format!(
                        "duplicate subcategory '{}' in category '{}'",
                        sub.name, category.name
                    )));
                }
            }
        }

        Ok(Self {
            categories,
            category_index,
            subcategory_index,
        })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.category_index.get(name).map(|&i| &self.categories[i])
    }

    pub fn subcategory(&self, category: &str, subcategory: &str) -> Option<&Subcategory> {
        self.subcategory_index
            .get(&(category.to_string(), subcategory.to_string()))
            .map(|&(ci, si)| &self.categories[ci].subcategories[si])
    }

    pub fn is_valid_category(&self, category: &str) -> bool {
        self.category_index.contains_key(category)
    }

    pub fn is_valid_subcategory(&self, category: &str, subcategory: &str) -> bool {
        self.subcategory(category, subcategory).is_some()
    }

    /// gridOnlyの場合は商品タイプ = サブカテゴリ名のときのみ有効
    pub fn is_valid_product_type(&self, category: &str, subcategory: &str, product_type: &str) -> bool {
        self.subcategory(category, subcategory)
            .map(|sub| sub.accepts(product_type))
            .unwrap_or(false)
    }

    /// 先頭カテゴリ（読み込み時に1件以上あることを検証済み）
    pub fn first_category(&self) -> &Category {
        &self.categories[0]
    }

    pub fn first_subcategory_of(&self, category: &str) -> Option<&Subcategory> {
        self.category(category).map(|c| &c.subcategories[0])
    }

    pub fn first_product_type_of(&self, category: &str, subcategory: &str) -> Option<&str> {
        self.subcategory(category, subcategory)
            .map(|sub| sub.first_product_type())
    }

    /// 有効な商品タイプ一覧（サブカテゴリが存在しない場合は空）
    pub fn product_types_of(&self, category: &str, subcategory: &str) -> Vec<&str> {
        self.subcategory(category, subcategory)
            .map(|sub| sub.valid_product_types())
            .unwrap_or_default()
    }

    /// 指定名のサブカテゴリを持つカテゴリ一覧（タクソノミー順）
    pub fn categories_containing(&self, subcategory: &str) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|c| c.subcategories.iter().any(|s| s.name == subcategory))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// プロンプト・キャッシュトークン用のJSON表現
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.categories).unwrap_or(serde_json::Value::Null)
    }
}
