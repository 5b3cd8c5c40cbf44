//! 二重カテゴリ付与
//!
//! 検証済みの分類に二重カテゴリマップを適用し、別カテゴリへの掲載先を付ける。
//!
//! 1. 規則評価: 掲載先 (カテゴリ, サブカテゴリ) を決める（商品タイプは未決定）
//! 2. 商品タイプ決定: gridOnly・商品タイプ1種類の掲載先はその場で確定し、
//!    それ以外はオラクルの「商品タイプのみ」モードで10件ずつ判定する

use crate::audit::{AuditLog, AuditRecord};
use crate::oracle::OracleClient;
use grocery_classifier_common::{
    AdditionalCategorization, CategorizedProduct, DualCategoryMap, Product, ProductTypeRequest,
    Taxonomy, Triple,
};
use std::sync::Arc;
use std::time::Duration;

/// 既定のチャンクサイズ
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// 商品タイプ決定待ちの掲載先
struct Pending {
    item: usize,
    slot: usize,
    request: ProductTypeRequest,
}

pub struct DualCategorizer {
    taxonomy: Arc<Taxonomy>,
    map: Arc<DualCategoryMap>,
    audit: Arc<AuditLog>,
    chunk_size: usize,
}

impl DualCategorizer {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        map: Arc<DualCategoryMap>,
        audit: Arc<AuditLog>,
        chunk_size: usize,
    ) -> Self {
        Self {
            taxonomy,
            map,
            audit,
            chunk_size: chunk_size.max(1),
        }
    }

    /// 掲載先を決める（商品タイプは None のまま）
    ///
    /// タクソノミーに存在しない掲載先は捨てて記録する。
    pub fn first_pass(&self, triple: &Triple, product: &Product) -> Vec<AdditionalCategorization> {
        let Some(target) = self
            .map
            .evaluate(&triple.category, &triple.subcategory, &triple.product_type)
        else {
            return Vec::new();
        };

        if target.category == triple.category && target.subcategory == triple.subcategory {
            return Vec::new();
        }

        if !self.taxonomy.is_valid_subcategory(&target.category, &target.subcategory) {
            tracing::warn!(
                product = %product.product_ref(),
                target = %format!("{} / {}", target.category, target.subcategory),
                "二重カテゴリの掲載先がタクソノミーにありません"
            );
            self.audit.append(AuditRecord::ambiguous(
                product,
                format!(
                    "dual target '{} / {}' from rule '{} / {}' is not in the taxonomy",
                    target.category, target.subcategory, triple.category, triple.subcategory
                ),
            ));
            return Vec::new();
        }

        vec![AdditionalCategorization {
            main_category: target.category,
            subcategory: target.subcategory,
            product_type: None,
        }]
    }

    /// 全商品に二重カテゴリを付ける
    pub async fn apply(&self, items: &mut [CategorizedProduct], oracle: &OracleClient) {
        for item in items.iter_mut() {
            let triple = Triple::new(&item.category, &item.subcategory, &item.product_type);
            item.additional_categorizations = self.first_pass(&triple, &item.product);
        }
        self.resolve_product_types(items, oracle).await;
    }

    /// 未決定の商品タイプを埋める
    pub async fn resolve_product_types(&self, items: &mut [CategorizedProduct], oracle: &OracleClient) {
        let mut pending = Vec::new();

        for (i, item) in items.iter_mut().enumerate() {
            let description = item.product.description.clone();
            for (slot, extra) in item.additional_categorizations.iter_mut().enumerate() {
                if extra.product_type.is_some() {
                    continue;
                }
                let Some(sub) = self.taxonomy.subcategory(&extra.main_category, &extra.subcategory) else {
                    continue;
                };
                let types = sub.valid_product_types();
                // gridOnly・商品タイプ未宣言はサブカテゴリ名で確定。候補が1件だけの
                // 場合もオラクルに聞かずに確定する（失敗時のフォールバックと同じ値）
                if sub.uses_own_name() || types.len() == 1 {
                    extra.product_type = Some(types[0].to_string());
                    continue;
                }
                pending.push(Pending {
                    item: i,
                    slot,
                    request: ProductTypeRequest {
                        description: description.clone(),
                        category: extra.main_category.clone(),
                        subcategory: extra.subcategory.clone(),
                        available_product_types: types.iter().map(|t| t.to_string()).collect(),
                    },
                });
            }
        }

        if pending.is_empty() {
            return;
        }
        tracing::info!(
            entries = pending.len(),
            chunk_size = self.chunk_size,
            "二重カテゴリの商品タイプを判定"
        );

        let delay = oracle.product_type_policy().inter_batch_delay();
        for (n, chunk) in pending.chunks(self.chunk_size).enumerate() {
            if n > 0 {
                pause(delay).await;
            }
            let requests: Vec<ProductTypeRequest> = chunk.iter().map(|p| p.request.clone()).collect();

            match oracle.submit_product_types(&requests).await {
                Ok(answers) => {
                    for (entry, answer) in chunk.iter().zip(answers) {
                        let chosen = answer.and_then(|a| canonical(&entry.request, &a));
                        let product_type = match chosen {
                            Some(pt) => pt,
                            None => {
                                let fallback = entry.request.available_product_types[0].clone();
                                self.audit.append(AuditRecord::ambiguous(
                                    &items[entry.item].product,
                                    format!(
                                        "dual product type not resolved for '{} / {}', fell back to '{}'",
                                        entry.request.category, entry.request.subcategory, fallback
                                    ),
                                ));
                                fallback
                            }
                        };
                        set_product_type(items, entry, product_type);
                    }
                }
                Err(e) => {
                    tracing::error!(chunk = n + 1, error = %e, "商品タイプ判定に失敗、先頭の商品タイプを使用");
                    for entry in chunk {
                        let fallback = entry.request.available_product_types[0].clone();
                        self.audit.append(AuditRecord::failure(
                            &items[entry.item].product,
                            "dual_product_type_chunk",
                            Some(format!("{}; fell back to '{}'", e, fallback)),
                            Some(Triple::new(
                                &entry.request.category,
                                &entry.request.subcategory,
                                &fallback,
                            )),
                        ));
                        set_product_type(items, entry, fallback);
                    }
                }
            }
        }
    }
}

/// 回答を有効な商品タイプの正式表記にする
fn canonical(request: &ProductTypeRequest, answer: &str) -> Option<String> {
    let answer = answer.trim();
    request
        .available_product_types
        .iter()
        .find(|pt| pt.eq_ignore_ascii_case(answer))
        .cloned()
}

fn set_product_type(items: &mut [CategorizedProduct], entry: &Pending, product_type: String) {
    if let Some(extra) = items
        .get_mut(entry.item)
        .and_then(|item| item.additional_categorizations.get_mut(entry.slot))
    {
        extra.product_type = Some(product_type);
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Arc<Taxonomy> {
        Arc::new(
            Taxonomy::from_json_str(
                r#"[
                  {"name": "Beverages", "subcategories": [
                    {"name": "Milk", "productTypes": ["Plant-Based Milk", "Chocolate Milk"]}
                  ]},
                  {"name": "Dairy & Eggs", "subcategories": [
                    {"name": "Plant-Based Milk", "productTypes": ["Milk"]},
                    {"name": "Milk", "productTypes": ["Whole Milk", "Chocolate Milk"]}
                  ]},
                  {"name": "Snacks", "subcategories": [
                    {"name": "Nuts", "gridOnly": true}
                  ]}
                ]"#,
            )
            .unwrap(),
        )
    }

    fn map() -> Arc<DualCategoryMap> {
        Arc::new(
            DualCategoryMap::from_json_str(
                r#"{
                  "Beverages": {"Milk": {
                    "product_type_to_subcategory": {"Plant-Based Milk": "Plant-Based Milk", "ALL": "Milk"},
                    "dual_category": "Dairy & Eggs"
                  }},
                  "Dairy & Eggs": {"Milk": {
                    "product_type_to_subcategory": {"ALL": "Milk"},
                    "dual_category": "Beverages"
                  }},
                  "Snacks": {"Nuts": {
                    "product_type_to_subcategory": {"ALL": "Trail Mix"},
                    "dual_category": "Snacks"
                  }}
                }"#,
            )
            .unwrap(),
        )
    }

    fn engine(audit: Arc<AuditLog>) -> DualCategorizer {
        DualCategorizer::new(taxonomy(), map(), audit, DEFAULT_CHUNK_SIZE)
    }

    #[test]
    fn test_first_pass_exact_product_type() {
        let engine = engine(Arc::new(AuditLog::in_memory()));
        let p = Product::new(None, "Silk Almond Milk");
        let extras = engine.first_pass(&Triple::new("Beverages", "Milk", "Plant-Based Milk"), &p);
        assert_eq!(
            extras,
            vec![AdditionalCategorization {
                main_category: "Dairy & Eggs".into(),
                subcategory: "Plant-Based Milk".into(),
                product_type: None,
            }]
        );
    }

    #[test]
    fn test_first_pass_cycle_is_single_hop() {
        let engine = engine(Arc::new(AuditLog::in_memory()));
        let p = Product::new(None, "Whole Milk");
        let extras = engine.first_pass(&Triple::new("Dairy & Eggs", "Milk", "Whole Milk"), &p);
        assert_eq!(extras.len(), 1);
        assert_eq!(extras[0].main_category, "Beverages");
        assert_eq!(extras[0].subcategory, "Milk");
    }

    #[test]
    fn test_first_pass_no_rule() {
        let engine = engine(Arc::new(AuditLog::in_memory()));
        let p = Product::new(None, "Milk");
        assert!(engine
            .first_pass(&Triple::new("Dairy & Eggs", "Plant-Based Milk", "Milk"), &p)
            .is_empty());
    }

    #[test]
    fn test_first_pass_drops_unknown_target() {
        let audit = Arc::new(AuditLog::in_memory());
        let engine = engine(audit.clone());
        let p = Product::new(None, "Salted Peanuts");
        assert!(engine.first_pass(&Triple::new("Snacks", "Nuts", "Nuts"), &p).is_empty());
        assert_eq!(audit.summary().ambiguous, 1);
    }

    #[test]
    fn test_canonical_answer() {
        let request = ProductTypeRequest {
            description: "Nesquik".into(),
            category: "Beverages".into(),
            subcategory: "Milk".into(),
            available_product_types: vec!["Plant-Based Milk".into(), "Chocolate Milk".into()],
        };
        assert_eq!(canonical(&request, " chocolate milk "), Some("Chocolate Milk".into()));
        assert_eq!(canonical(&request, "Soda"), None);
    }
}
