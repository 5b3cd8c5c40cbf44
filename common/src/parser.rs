//! オラクルレスポンスパーサー
//!
//! AI CLI / HTTP APIのレスポンスからJSONを抽出し、
//! 分類結果・商品タイプ回答をパースする

use crate::error::{Error, Result};
use crate::types::{ProductTypeAnswer, RawClassification};

/// レスポンスからJSON部分を抽出
///
/// 抽出優先順位:
/// 1. ```json ... ``` ブロック
/// 2. ``` ... ``` ブロック
/// 3. 生の [...] 配列
/// 4. エラー
///
/// # Examples
/// ```
/// use grocery_classifier_common::extract_json;
///
/// let response = "[{\"category\": \"Produce\"}]";
/// let json = extract_json(response).unwrap();
/// assert!(json.contains("Produce"));
/// ```
pub fn extract_json(response: &str) -> Result<&str> {
    for marker in ["```json", "```"] {
        if let Some(start_marker) = response.find(marker) {
            let start = start_marker + marker.len();
            if let Some(end_offset) = response[start..].find("```") {
                let end = start + end_offset;
                return Ok(response[start..end].trim());
            }
        }
    }

    if let Some(start) = response.find('[') {
        if let Some(end) = response.rfind(']') {
            if end >= start {
                return Ok(&response[start..=end]);
            }
        }
    }

    Err(Error::Parse("no JSON array found in response".into()))
}

/// 分類レスポンスをパース
pub fn parse_classification_response(response: &str) -> Result<Vec<RawClassification>> {
    let json_str = extract_json(response)?;
    serde_json::from_str(json_str.trim())
        .map_err(|e| Error::Parse(format!("classification JSON: {}", e)))
}

/// 商品タイプのみ判定レスポンスをパース
pub fn parse_product_type_response(response: &str) -> Result<Vec<ProductTypeAnswer>> {
    let json_str = extract_json(response)?;
    serde_json::from_str(json_str.trim())
        .map_err(|e| Error::Parse(format!("product type JSON: {}", e)))
}
