//! 分類パイプラインの型定義
//!
//! CLIとゲートウェイで共有される型:
//! - Product: 入力商品
//! - Triple: (カテゴリ, サブカテゴリ, 商品タイプ)
//! - RawClassification / ProductTypeRequest: 分類オラクルとのやりとり
//! - ClassificationResult / CategorizedProduct: 最終出力

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 分類不能時のプレースホルダー
pub const UNCATEGORIZED: &str = "Uncategorized";
pub const UNKNOWN: &str = "Unknown";

/// 出力時に分類結果で上書きされるキー
const RESERVED_KEYS: &[&str] = &[
    "category",
    "subcategory",
    "product_type",
    "additionalCategorizations",
    "preClassified",
];

/// 入力商品
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    /// 仕入先側のカテゴリ名（プロンプトのヒントに使う）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    /// ゲートウェイが付けるその他の項目（価格、画像URLなど）はそのまま返す
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Product {
    pub fn new(product_id: Option<&str>, description: &str) -> Self {
        Self {
            product_id: product_id.map(|s| s.to_string()),
            description: description.to_string(),
            ..Default::default()
        }
    }

    /// 監査ログ等で使う商品参照（商品ID優先）
    pub fn product_ref(&self) -> String {
        match &self.product_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.description.clone(),
        }
    }
}

/// (カテゴリ, サブカテゴリ, 商品タイプ)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub category: String,
    pub subcategory: String,
    pub product_type: String,
}

impl Triple {
    pub fn new(category: &str, subcategory: &str, product_type: &str) -> Self {
        Self {
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            product_type: product_type.to_string(),
        }
    }

    /// 件数不一致の穴埋めに使うプレースホルダー
    pub fn uncategorized() -> Self {
        Self::new(UNCATEGORIZED, UNKNOWN, UNKNOWN)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.category, self.subcategory, self.product_type)
    }
}

/// オラクルの生の分類結果（1商品分）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawClassification {
    /// リクエスト内の位置（省略されることがある）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub category: String,
    pub subcategory: String,
    #[serde(alias = "productType")]
    pub product_type: String,
}

impl RawClassification {
    pub fn placeholder(index: usize) -> Self {
        let triple = Triple::uncategorized();
        Self {
            index: Some(index),
            category: triple.category,
            subcategory: triple.subcategory,
            product_type: triple.product_type,
        }
    }

    pub fn to_triple(&self) -> Triple {
        Triple::new(&self.category, &self.subcategory, &self.product_type)
    }
}

/// オラクルに送る商品記述子
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductDescriptor {
    pub index: usize,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_categories: Vec<String>,
    /// 仕入先カテゴリから絞り込んだ候補カテゴリ
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidate_categories: Vec<String>,
}

/// 商品タイプのみ判定モードのリクエスト
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductTypeRequest {
    pub description: String,
    pub category: String,
    pub subcategory: String,
    pub available_product_types: Vec<String>,
}

/// 商品タイプのみ判定モードの回答
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProductTypeAnswer {
    pub index: Option<usize>,
    #[serde(alias = "productType")]
    pub product_type: String,
}

/// 追加掲載先（二重カテゴリ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalCategorization {
    pub main_category: String,
    pub subcategory: String,
    /// 第2パスで決定するまでは None
    pub product_type: Option<String>,
}

/// 1商品の最終分類結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "productRef")]
    pub product_ref: String,
    pub category: String,
    pub subcategory: String,
    pub product_type: String,
    #[serde(rename = "additionalCategorizations", default)]
    pub additional_categorizations: Vec<AdditionalCategorization>,
}

impl ClassificationResult {
    pub fn new(product_ref: &str, triple: Triple) -> Self {
        Self {
            product_ref: product_ref.to_string(),
            category: triple.category,
            subcategory: triple.subcategory,
            product_type: triple.product_type,
            additional_categorizations: Vec::new(),
        }
    }

    pub fn triple(&self) -> Triple {
        Triple::new(&self.category, &self.subcategory, &self.product_type)
    }
}

/// 出力商品（入力商品 + 分類結果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedProduct {
    #[serde(flatten)]
    pub product: Product,
    pub category: String,
    pub subcategory: String,
    pub product_type: String,
    #[serde(rename = "additionalCategorizations")]
    pub additional_categorizations: Vec<AdditionalCategorization>,
    /// 修正マップから分類された（オラクル未使用）
    #[serde(rename = "preClassified", default)]
    pub pre_classified: bool,
}

impl CategorizedProduct {
    pub fn new(mut product: Product, result: ClassificationResult, pre_classified: bool) -> Self {
        for key in RESERVED_KEYS {
            product.extra.remove(*key);
        }
        Self {
            product,
            category: result.category,
            subcategory: result.subcategory,
            product_type: result.product_type,
            additional_categorizations: result.additional_categorizations,
            pre_classified,
        }
    }
}

/// パイプラインの入口（ゲートウェイから受け取る）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub products: Vec<Product>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cache_token: Option<String>,
}

/// パイプラインの出力
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineResponse {
    #[serde(rename = "categorizedProducts")]
    pub categorized_products: Vec<CategorizedProduct>,
    pub cache_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_ref_prefers_id() {
        let p = Product::new(Some("0001111"), "Silk Almond Milk");
        assert_eq!(p.product_ref(), "0001111");
        let p = Product::new(None, "Silk Almond Milk");
        assert_eq!(p.product_ref(), "Silk Almond Milk");
        let p = Product::new(Some(""), "Silk Almond Milk");
        assert_eq!(p.product_ref(), "Silk Almond Milk");
    }

    #[test]
    fn test_product_keeps_extra_fields() {
        let json = r#"{"productId": "42", "description": "Bananas", "price": 0.59, "image_url": "x.png"}"#;
        let p: Product = serde_json::from_str(json).unwrap();
        assert_eq!(p.product_id.as_deref(), Some("42"));
        assert_eq!(p.extra.get("price"), Some(&serde_json::json!(0.59)));

        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["image_url"], "x.png");
    }

    #[test]
    fn test_raw_classification_accepts_camel_case() {
        let json = r#"{"category": "Produce", "subcategory": "Fresh Fruit", "productType": "Apples"}"#;
        let raw: RawClassification = serde_json::from_str(json).unwrap();
        assert_eq!(raw.product_type, "Apples");
        assert_eq!(raw.index, None);
    }

    #[test]
    fn test_categorized_product_serialization() {
        let mut product = Product::new(Some("1"), "Silk Almond Milk");
        product.extra.insert("category".into(), serde_json::json!("stale"));
        let mut result = ClassificationResult::new("1", Triple::new("Beverages", "Milk", "Plant-Based Milk"));
        result.additional_categorizations.push(AdditionalCategorization {
            main_category: "Dairy & Eggs".into(),
            subcategory: "Plant-Based Milk".into(),
            product_type: Some("Milk".into()),
        });

        let out = CategorizedProduct::new(product, result, false);
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["category"], "Beverages");
        assert_eq!(value["product_type"], "Plant-Based Milk");
        assert_eq!(value["additionalCategorizations"][0]["main_category"], "Dairy & Eggs");
        assert_eq!(value["preClassified"], false);
    }

    #[test]
    fn test_pipeline_request_without_token() {
        let req: PipelineRequest =
            serde_json::from_str(r#"{"products": [{"description": "Bananas"}]}"#).unwrap();
        assert_eq!(req.products.len(), 1);
        assert!(req.existing_cache_token.is_none());
    }

    #[test]
    fn test_triple_display() {
        let t = Triple::new("Produce", "Fresh Fruit", "Apples");
        assert_eq!(t.to_string(), "Produce / Fresh Fruit / Apples");
    }
}
