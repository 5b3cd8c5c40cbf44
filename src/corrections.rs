//! 修正マップ（人手で確認済みの分類）
//!
//! 商品キー → (カテゴリ, サブカテゴリ, 商品タイプ)。分類前に参照し、
//! 一致した商品はオラクルを通さずに分類済みとして扱う。
//!
//! 書き込みは承認フロー（`approve`）からのみ行い、一時ファイル + rename で
//! 置き換える。パイプラインは実行開始時のスナップショットだけを読む。

use crate::audit::{AuditLog, AuditRecord};
use crate::error::{ClassifierError, Result};
use grocery_classifier_common::{
    clean_description, strip_brand_prefix, CategorizedProduct, ClassificationResult, Product,
    Taxonomy, Triple,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// 商品IDキーの接頭辞
pub const ID_KEY_PREFIX: &str = "productId:";

/// この値以上ならあいまい一致を採用
pub const FUZZY_MATCH_THRESHOLD: f64 = 90.0;
/// この値以上ならニアミスとして記録
pub const NEAR_MISS_THRESHOLD: f64 = 65.0;

/// ブランド名なしのキーも作るストアブランド（長いものから判定）
const STORE_BRANDS: &[&str] = &[
    "Simple Truth Organic",
    "Simple Truth",
    "Private Selection",
    "Kroger",
];

pub fn id_key(product_id: &str) -> String {
    format!("{}{}", ID_KEY_PREFIX, product_id.trim())
}

/// 説明文の照合キー（整形 + 小文字化）
pub fn description_key(description: &str) -> String {
    clean_description(description).to_lowercase()
}

/// ブランド名を除いた小文字キー
///
/// ブランド指定があればそれを、なければ既知のストアブランドを試す。
fn brand_stripped_key(cleaned: &str, brand: Option<&str>) -> Option<String> {
    match brand {
        Some(brand) if !brand.trim().is_empty() => strip_brand_prefix(cleaned, brand),
        _ => STORE_BRANDS
            .iter()
            .find_map(|store| strip_brand_prefix(cleaned, store)),
    }
}

/// 1件の修正を書き込むキー一覧
///
/// 商品ID、整形済みの表示名、その小文字形、ブランド名を除いた形。
pub fn derive_keys(product_id: Option<&str>, name: Option<&str>, brand: Option<&str>) -> Vec<String> {
    let mut keys = Vec::new();

    if let Some(id) = product_id.filter(|id| !id.trim().is_empty()) {
        keys.push(id_key(id));
    }

    if let Some(name) = name {
        let cleaned = clean_description(name);
        if !cleaned.is_empty() {
            keys.push(cleaned.clone());
            keys.push(cleaned.to_lowercase());
            if let Some(stripped) = brand_stripped_key(&cleaned, brand) {
                keys.push(stripped);
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    keys.retain(|k| seen.insert(k.clone()));
    keys
}

/// あいまい一致の結果
#[derive(Debug, Clone, PartialEq)]
pub enum FuzzyOutcome<'a> {
    Match { key: &'a str, triple: &'a Triple, score: f64 },
    NearMiss { key: &'a str, score: f64 },
    NoMatch,
}

/// 修正マップのスナップショット
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionMap {
    entries: HashMap<String, Triple>,
}

impl CorrectionMap {
    pub fn from_entries(entries: HashMap<String, Triple>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Triple> {
        self.entries.get(key)
    }

    /// キー順に並べたエントリ（キャッシュトークン・保存用）
    pub fn sorted(&self) -> BTreeMap<&str, &Triple> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    /// 商品IDキーの件数
    pub fn id_key_count(&self) -> usize {
        self.entries.keys().filter(|k| k.starts_with(ID_KEY_PREFIX)).count()
    }

    /// 完全一致の検索。商品IDが説明文より優先される。
    pub fn lookup(&self, product_id: Option<&str>, description_lower: &str) -> Option<&Triple> {
        if let Some(id) = product_id.filter(|id| !id.trim().is_empty()) {
            if let Some(triple) = self.entries.get(&id_key(id)) {
                return Some(triple);
            }
        }
        if description_lower.is_empty() {
            return None;
        }
        self.entries.get(description_lower)
    }

    /// 説明文キーとのあいまい一致（商品IDキーは対象外）
    pub fn lookup_fuzzy(&self, description_lower: &str) -> FuzzyOutcome<'_> {
        if description_lower.is_empty() {
            return FuzzyOutcome::NoMatch;
        }

        let mut best: Option<(&str, &Triple, f64)> = None;
        for (key, triple) in &self.entries {
            if key.starts_with(ID_KEY_PREFIX) {
                continue;
            }
            let score = strsim::normalized_levenshtein(description_lower, &key.to_lowercase()) * 100.0;
            let better = match best {
                None => true,
                // 同点はキーの辞書順で決める
                Some((best_key, _, best_score)) => {
                    score > best_score || (score == best_score && key.as_str() < best_key)
                }
            };
            if better {
                best = Some((key.as_str(), triple, score));
            }
        }

        match best {
            Some((key, triple, score)) if score >= FUZZY_MATCH_THRESHOLD => {
                FuzzyOutcome::Match { key, triple, score }
            }
            Some((key, _, score)) if score >= NEAR_MISS_THRESHOLD => FuzzyOutcome::NearMiss { key, score },
            _ => FuzzyOutcome::NoMatch,
        }
    }

    /// 商品に対応する修正を探す
    ///
    /// 商品ID → 説明文 → ブランド名を除いた説明文 → あいまい一致（有効時）。
    /// ニアミスは監査ログに残すだけで分類には使わない。
    pub fn resolve(&self, product: &Product, fuzzy: bool, audit: &AuditLog) -> Option<Triple> {
        let key = description_key(&product.description);
        if let Some(triple) = self.lookup(product.product_id.as_deref(), &key) {
            return Some(triple.clone());
        }

        let cleaned = clean_description(&product.description);
        if let Some(stripped) = brand_stripped_key(&cleaned, product.brand.as_deref()) {
            if let Some(triple) = self.entries.get(&stripped) {
                return Some(triple.clone());
            }
        }

        if !fuzzy {
            return None;
        }

        match self.lookup_fuzzy(&key) {
            FuzzyOutcome::Match { key: matched, triple, score } => {
                tracing::debug!(
                    product = %product.product_ref(),
                    matched,
                    score,
                    "修正マップにあいまい一致"
                );
                Some(triple.clone())
            }
            FuzzyOutcome::NearMiss { key: best_match, score } => {
                audit.append(AuditRecord::near_miss(&cleaned, best_match, score));
                None
            }
            FuzzyOutcome::NoMatch => None,
        }
    }

    /// 修正を商品に重ね、分類済みとして印を付ける
    pub fn apply(product: &Product, entry: &Triple) -> CategorizedProduct {
        let result = ClassificationResult::new(&product.product_ref(), entry.clone());
        CategorizedProduct::new(product.clone(), result, true)
    }
}

/// 修正マップの保存先
pub trait CorrectionStore: Send + Sync {
    /// 現在の内容を読み込む（存在しなければ空）
    fn load(&self) -> Result<CorrectionMap>;

    /// 1件の修正を複数キーで書き込む
    fn persist(&self, entry: &Triple, keys: &[String]) -> Result<()>;
}

/// 承認された分類を修正マップに登録する
///
/// タクソノミー上無効な組み合わせは拒否する。書き込んだキーを返す。
pub fn approve_correction(
    store: &dyn CorrectionStore,
    taxonomy: &Taxonomy,
    triple: &Triple,
    product_id: Option<&str>,
    name: Option<&str>,
    brand: Option<&str>,
) -> Result<Vec<String>> {
    if !taxonomy.is_valid_product_type(&triple.category, &triple.subcategory, &triple.product_type) {
        return Err(ClassifierError::InvalidTriple(triple.to_string()));
    }

    let keys = derive_keys(product_id, name, brand);
    store.persist(triple, &keys)?;
    Ok(keys)
}

/// JSONファイルの修正マップ
pub struct JsonCorrectionStore {
    path: PathBuf,
}

impl JsonCorrectionStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "correction_map.json".into());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }
}

impl CorrectionStore for JsonCorrectionStore {
    fn load(&self) -> Result<CorrectionMap> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "修正マップがありません（空で開始）");
            return Ok(CorrectionMap::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(CorrectionMap::default());
        }

        let entries: HashMap<String, Triple> = serde_json::from_str(&content)?;
        Ok(CorrectionMap::from_entries(entries))
    }

    fn persist(&self, entry: &Triple, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Err(ClassifierError::InvalidTriple(
                "修正の保存キーがありません（商品IDまたは商品名が必要です）".into(),
            ));
        }

        let current = self.load()?;
        let mut entries: BTreeMap<String, Triple> = current
            .entries
            .into_iter()
            .collect();
        for key in keys {
            entries.insert(key.clone(), entry.clone());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // 一時ファイルに書いてから置き換える
        let temp = self.temp_path();
        std::fs::write(&temp, serde_json::to_string_pretty(&entries)?)?;
        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }

        tracing::info!(
            path = %self.path.display(),
            keys = keys.len(),
            triple = %entry,
            "修正を保存"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn triple(c: &str, s: &str, p: &str) -> Triple {
        Triple::new(c, s, p)
    }

    #[test]
    fn test_derive_keys() {
        let keys = derive_keys(Some("0001111"), Some("Kroger® Whole  Milk"), None);
        assert_eq!(
            keys,
            vec![
                "productId:0001111".to_string(),
                "Kroger Whole Milk".to_string(),
                "kroger whole milk".to_string(),
                "whole milk".to_string(),
            ]
        );
    }

    #[test]
    fn test_derive_keys_prefers_longest_store_brand() {
        let keys = derive_keys(None, Some("Simple Truth Organic Bananas"), None);
        assert!(keys.contains(&"bananas".to_string()));
        assert!(!keys.contains(&"organic bananas".to_string()));
    }

    #[test]
    fn test_derive_keys_with_explicit_brand() {
        let keys = derive_keys(None, Some("Silk Almond Milk"), Some("Silk"));
        assert_eq!(keys.last().map(String::as_str), Some("almond milk"));
    }

    #[test]
    fn test_lookup_id_wins() {
        let mut entries = HashMap::new();
        entries.insert("productId:42".into(), triple("Beverages", "Milk", "Plant-Based Milk"));
        entries.insert("silk almond milk".into(), triple("Dairy & Eggs", "Milk", "Whole Milk"));
        let map = CorrectionMap::from_entries(entries);

        let hit = map.lookup(Some("42"), "silk almond milk").unwrap();
        assert_eq!(hit.category, "Beverages");

        let hit = map.lookup(Some("99"), "silk almond milk").unwrap();
        assert_eq!(hit.category, "Dairy & Eggs");
        assert!(map.lookup(None, "oat milk").is_none());
    }

    #[test]
    fn test_fuzzy_thresholds() {
        let mut entries = HashMap::new();
        entries.insert("silk almond milk unsweetened".into(), triple("Beverages", "Milk", "Plant-Based Milk"));
        entries.insert("productId:silk almond milk unsweetenedd".into(), triple("X", "Y", "Z"));
        let map = CorrectionMap::from_entries(entries);

        // 1文字違い
        assert!(matches!(
            map.lookup_fuzzy("silk almond milk unsweetene"),
            FuzzyOutcome::Match { key: "silk almond milk unsweetened", .. }
        ));
        // 語尾が欠けている
        assert!(matches!(
            map.lookup_fuzzy("silk almond milk unsweet"),
            FuzzyOutcome::NearMiss { .. }
        ));
        assert_eq!(map.lookup_fuzzy("frozen pizza"), FuzzyOutcome::NoMatch);
    }

    #[test]
    fn test_resolve_logs_near_miss() {
        let mut entries = HashMap::new();
        entries.insert("silk almond milk unsweetened".into(), triple("Beverages", "Milk", "Plant-Based Milk"));
        let map = CorrectionMap::from_entries(entries);
        let audit = AuditLog::in_memory();

        let product = Product::new(None, "Silk Almond Milk Unsweet");
        assert!(map.resolve(&product, true, &audit).is_none());
        assert_eq!(audit.records().len(), 1);

        // あいまい一致を無効にすると記録もしない
        let audit = AuditLog::in_memory();
        assert!(map.resolve(&product, false, &audit).is_none());
        assert!(audit.records().is_empty());
    }

    #[test]
    fn test_resolve_brand_stripped() {
        let mut entries = HashMap::new();
        entries.insert("whole milk".into(), triple("Dairy & Eggs", "Milk", "Whole Milk"));
        let map = CorrectionMap::from_entries(entries);

        let product = Product::new(None, "Kroger Whole Milk");
        let hit = map.resolve(&product, false, &AuditLog::in_memory()).unwrap();
        assert_eq!(hit.product_type, "Whole Milk");
    }

    #[test]
    fn test_apply_marks_pre_classified() {
        let product = Product::new(Some("42"), "Silk Almond Milk");
        let applied = CorrectionMap::apply(&product, &triple("Beverages", "Milk", "Plant-Based Milk"));
        assert!(applied.pre_classified);
        assert_eq!(applied.category, "Beverages");
        assert!(applied.additional_categorizations.is_empty());
    }

    #[test]
    fn test_missing_and_empty_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = JsonCorrectionStore::new(&dir.path().join("correction_map.json"));
        assert!(store.load().unwrap().is_empty());

        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_persist_merges_and_replaces() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = JsonCorrectionStore::new(&dir.path().join("correction_map.json"));

        let keys = derive_keys(Some("1"), Some("Gala Apples"), None);
        store.persist(&triple("Produce", "Fresh Fruit", "Apples"), &keys).unwrap();
        store
            .persist(&triple("Produce", "Fresh Fruit", "Bananas"), &["bananas".to_string()])
            .unwrap();

        let map = store.load().unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map.get("productId:1").unwrap().product_type, "Apples");
        assert_eq!(map.get("bananas").unwrap().product_type, "Bananas");

        // 一時ファイルは残らない
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_approve_rejects_invalid_triple() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = JsonCorrectionStore::new(&dir.path().join("correction_map.json"));
        let taxonomy = Taxonomy::from_json_str(
            r#"[{"name": "Produce", "subcategories": [{"name": "Fresh Fruit", "productTypes": ["Apples"]}]}]"#,
        )
        .unwrap();

        let bad = triple("Produce", "Fresh Fruit", "Cheddar");
        assert!(matches!(
            approve_correction(&store, &taxonomy, &bad, Some("1"), None, None),
            Err(ClassifierError::InvalidTriple(_))
        ));
        assert!(!store.path().exists());

        let good = triple("Produce", "Fresh Fruit", "Apples");
        let keys = approve_correction(&store, &taxonomy, &good, Some("1"), Some("Gala Apples"), None).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[test]
    fn test_persist_requires_keys() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = JsonCorrectionStore::new(&dir.path().join("correction_map.json"));
        assert!(store.persist(&triple("A", "B", "C"), &[]).is_err());
    }
}
