//! 商品名・ラベルの正規化

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TRADEMARKS: Regex = Regex::new(r"[™®©\u{00A0}]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// 商標記号・ノーブレークスペースを除去し、空白を1つにまとめる
pub fn clean_description(text: &str) -> String {
    let without_marks = TRADEMARKS.replace_all(text, " ");
    WHITESPACE.replace_all(&without_marks, " ").trim().to_string()
}

/// オラクルが返したラベルの表記ゆれを正す（HTMLエスケープされた & と前後空白）
pub fn normalize_label(label: &str) -> String {
    label.replace("&amp;", "&").trim().to_string()
}

/// 先頭のブランド名を取り除く（大文字小文字は区別しない）
///
/// ブランド名だけの文字列や一致しない場合は None。
pub fn strip_brand_prefix(name: &str, brand: &str) -> Option<String> {
    let brand = brand.trim();
    if brand.is_empty() {
        return None;
    }
    let lower = name.to_lowercase();
    let prefix = format!("{} ", brand.to_lowercase());
    let rest = lower.strip_prefix(&prefix)?.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
