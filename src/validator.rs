//! 分類結果の検証・補正
//!
//! オラクルが返した (カテゴリ, サブカテゴリ, 商品タイプ) をタクソノミーに
//! 照らして直す。
//!
//! - auto_correct: サブカテゴリが別カテゴリにある等、一意に直せるものを修復
//! - validate: 残った不整合を先頭要素へのフォールバックで必ず有効にする
//!
//! カテゴリ階層の修復は商品タイプの修復より先に行う（誤ったサブカテゴリの
//! 商品タイプ一覧から選んでしまうため）。

use crate::audit::{AuditLog, AuditRecord, Confidence};
use grocery_classifier_common::{normalize_label, Product, Taxonomy, Triple, UNKNOWN};
use std::sync::Arc;

pub struct TripleValidator {
    taxonomy: Arc<Taxonomy>,
    audit: Arc<AuditLog>,
}

impl TripleValidator {
    pub fn new(taxonomy: Arc<Taxonomy>, audit: Arc<AuditLog>) -> Self {
        Self { taxonomy, audit }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// auto_correct → validate の順で通す。結果は常にタクソノミー上有効。
    pub fn finalize(&self, triple: &Triple, product: &Product) -> Triple {
        let corrected = self.auto_correct(triple, product);
        self.validate(&corrected, product)
    }

    /// タクソノミー上有効な組み合わせに必ず落とし込む
    pub fn validate(&self, triple: &Triple, product: &Product) -> Triple {
        let original = normalized(triple);
        let mut category = original.category.clone();
        let mut subcategory = original.subcategory.clone();

        // 1. 不明なカテゴリ: 先頭カテゴリ/サブカテゴリ/商品タイプにまとめて落とす
        if !self.taxonomy.is_valid_category(&category) {
            let first = self.taxonomy.first_category();
            let sub = &first.subcategories[0];
            let fallback = Triple::new(&first.name, &sub.name, sub.first_product_type());
            self.audit.append(AuditRecord::failure(
                product,
                "invalid_category",
                Some(format!("unknown category '{}', fell back to '{}'", category, fallback)),
                Some(original.clone()),
            ));
            return fallback;
        }

        // 2. カテゴリ内に存在しないサブカテゴリ
        if !self.taxonomy.is_valid_subcategory(&category, &subcategory) {
            if let Some(first) = self.taxonomy.first_subcategory_of(&category) {
                self.audit.append(AuditRecord::failure(
                    product,
                    "invalid_subcategory",
                    Some(format!(
                        "subcategory '{}' not in '{}', fell back to '{}'",
                        subcategory, category, first.name
                    )),
                    Some(original.clone()),
                ));
                subcategory = first.name.clone();
            }
        }

        let Some(sub) = self.taxonomy.subcategory(&category, &subcategory) else {
            // カテゴリは必ずサブカテゴリを持つので到達しない
            return Triple::new(&category, &subcategory, &subcategory);
        };

        // 3. gridOnly は商品タイプ = サブカテゴリ名
        if sub.grid_only {
            return Triple::new(&category, &subcategory, &sub.name);
        }

        // 4. 不正な商品タイプ
        let product_type = original.product_type.clone();
        if sub.accepts(&product_type) {
            return Triple::new(&category, &subcategory, &product_type);
        }

        let fallback = sub.first_product_type().to_string();
        self.flag_unknown_product_type(&Triple::new(&category, &subcategory, &product_type), product);
        self.audit.append(AuditRecord::failure(
            product,
            "invalid_product_type",
            Some(format!(
                "product type '{}' not in '{} / {}', fell back to '{}'",
                product_type, category, subcategory, fallback
            )),
            Some(original.clone()),
        ));
        Triple::new(&category, &subcategory, &fallback)
    }

    /// validate が見逃すカテゴリ/サブカテゴリの食い違いを直す
    ///
    /// 直せないもの（候補が複数・サブカテゴリが存在しない）は記録して
    /// そのまま返す。
    pub fn auto_correct(&self, triple: &Triple, product: &Product) -> Triple {
        let triple = normalized(triple);

        if self.taxonomy.is_valid_subcategory(&triple.category, &triple.subcategory) {
            if self
                .taxonomy
                .is_valid_product_type(&triple.category, &triple.subcategory, &triple.product_type)
            {
                return triple;
            }
            return self.correct_product_type(&triple, product);
        }

        let candidates = self.taxonomy.categories_containing(&triple.subcategory);
        match candidates.as_slice() {
            [category] => {
                let fixed = Triple::new(category, &triple.subcategory, &triple.product_type);
                self.audit.append(AuditRecord::correction(
                    product,
                    triple.clone(),
                    Some(fixed.clone()),
                    vec![category.to_string()],
                    Confidence::High,
                    "fixed_category_hierarchy",
                ));
                tracing::debug!(
                    product = %product.product_ref(),
                    from = %triple.category,
                    to = %fixed.category,
                    "カテゴリ階層を修正"
                );
                if self
                    .taxonomy
                    .is_valid_product_type(&fixed.category, &fixed.subcategory, &fixed.product_type)
                {
                    fixed
                } else {
                    self.correct_product_type(&fixed, product)
                }
            }
            [] => {
                self.audit.append(AuditRecord::correction(
                    product,
                    triple.clone(),
                    None,
                    Vec::new(),
                    Confidence::Low,
                    "subcategory_not_found",
                ));
                triple
            }
            many => {
                self.audit.append(AuditRecord::correction(
                    product,
                    triple.clone(),
                    None,
                    many.iter().map(|c| c.to_string()).collect(),
                    Confidence::Low,
                    "multiple_possible_categories",
                ));
                triple
            }
        }
    }

    /// 有効な (カテゴリ, サブカテゴリ) に対して商品タイプを選び直す
    ///
    /// 大文字小文字違い → 商品名に含まれる商品タイプ（最長一致）→ 先頭。
    pub fn correct_product_type(&self, triple: &Triple, product: &Product) -> Triple {
        let Some(sub) = self.taxonomy.subcategory(&triple.category, &triple.subcategory) else {
            return triple.clone();
        };

        if !sub.grid_only {
            self.flag_unknown_product_type(triple, product);
        }

        let valid = sub.valid_product_types();
        let chosen = if sub.uses_own_name() {
            sub.name.clone()
        } else {
            let description = product.description.to_lowercase();
            valid
                .iter()
                .find(|pt| pt.eq_ignore_ascii_case(&triple.product_type))
                .or_else(|| {
                    valid
                        .iter()
                        .filter(|pt| description.contains(&pt.to_lowercase()))
                        .max_by_key(|pt| pt.len())
                })
                .map(|pt| pt.to_string())
                .unwrap_or_else(|| sub.first_product_type().to_string())
        };

        let corrected = Triple::new(&triple.category, &triple.subcategory, &chosen);
        if corrected != *triple {
            let confidence = if sub.grid_only { Confidence::High } else { Confidence::Medium };
            self.audit.append(AuditRecord::correction(
                product,
                triple.clone(),
                Some(corrected.clone()),
                valid.iter().map(|pt| pt.to_string()).collect(),
                confidence,
                "corrected_product_type",
            ));
        }
        corrected
    }

    /// gridOnly 以外で "Unknown" が返ってきたものは要確認として残す
    ///
    /// サブカテゴリ名への置き換えはせず、通常の補正に任せる。
    fn flag_unknown_product_type(&self, triple: &Triple, product: &Product) {
        if !triple.product_type.eq_ignore_ascii_case(UNKNOWN) {
            return;
        }
        self.audit.append(AuditRecord::ambiguous(
            product,
            format!(
                "unknown_product_type: oracle returned '{}' for non-gridOnly '{} / {}'",
                triple.product_type, triple.category, triple.subcategory
            ),
        ));
    }
}

fn normalized(triple: &Triple) -> Triple {
    Triple::new(
        &normalize_label(&triple.category),
        &normalize_label(&triple.subcategory),
        &normalize_label(&triple.product_type),
    )
}
