//! プロンプト生成モジュール
//!
//! - build_classification_prompt: 一括分類用プロンプト
//! - build_product_type_prompt: 商品タイプのみ判定用プロンプト

use crate::taxonomy::Taxonomy;
use crate::types::{ProductDescriptor, ProductTypeRequest};

/// 一括分類プロンプト生成
///
/// # Arguments
/// * `products` - バッチ内の商品記述子（index はバッチ内の位置）
/// * `taxonomy` - 選択肢となるタクソノミー
pub fn build_classification_prompt(products: &[ProductDescriptor], taxonomy: &Taxonomy) -> String {
    let taxonomy_str = serde_json::to_string(&taxonomy.to_json_value()).unwrap_or_default();
    let products_str = serde_json::to_string_pretty(products).unwrap_or_default();
    let count = products.len();

    format!(
        r#"You are a grocery catalog specialist. Classify every product below into exactly one
(category, subcategory, product_type) triple taken from the taxonomy.

## Taxonomy
Each category lists its subcategories. A subcategory marked "gridOnly" has no product types:
use the subcategory name itself as product_type.
{taxonomy_str}

## Products
{products_str}

## Rules
1. category, subcategory and product_type must be copied exactly from the taxonomy
2. subcategory must belong to the chosen category
3. product_type must belong to the chosen subcategory
4. If a product lists "candidate_categories", pick the category from that list unless the
   description clearly belongs elsewhere
5. Return exactly {count} items, one per product, in the same order, echoing "index"

## Output (JSON array only, no explanation)
```json
[
  {{"index": 0, "category": "...", "subcategory": "...", "product_type": "..."}}
]
```"#
    )
}

/// 商品タイプのみ判定プロンプト生成
///
/// カテゴリ・サブカテゴリは確定済みで、候補リストから商品タイプだけを選ばせる。
pub fn build_product_type_prompt(requests: &[ProductTypeRequest]) -> String {
    let items: Vec<serde_json::Value> = requests
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut value = serde_json::to_value(r).unwrap_or(serde_json::Value::Null);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("index".into(), i.into());
            }
            value
        })
        .collect();
    let items_str = serde_json::to_string_pretty(&items).unwrap_or_default();
    let count = requests.len();

    format!(
        r#"Select ONE product_type for each product below.
Category and subcategory are already decided. Copy the product_type EXACTLY from that
item's availableProductTypes; never invent new values.

## Products
{items_str}

## Output (JSON array of {count} items only, no markdown, no explanation)
[
  {{"index": 0, "product_type": "..."}}
]"#
    )
}
