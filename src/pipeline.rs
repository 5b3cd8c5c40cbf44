//! 分類パイプライン
//!
//! 商品リスト → 修正マップで既知商品を除外 → 残りをバッチでオラクルへ →
//! 検証・補正 → 二重カテゴリ付与 → 元の順序で結合。
//!
//! バッチは1つずつ順番に処理し、間に待ち時間を入れる。リトライ上限に
//! 達したバッチの商品は失敗として記録し、出力から除外する。

use crate::audit::{AuditLog, AuditRecord};
use crate::config::Config;
use crate::corrections::{CorrectionMap, CorrectionStore, JsonCorrectionStore};
use crate::dual::{DualCategorizer, DEFAULT_CHUNK_SIZE};
use crate::error::{ClassifierError, Result};
use crate::oracle::{split_plan, OracleClient, Transport};
use crate::validator::TripleValidator;
use grocery_classifier_common::{
    CategorizedProduct, ClassificationResult, DualCategoryMap, PipelineRequest, PipelineResponse,
    CategoryConstraints, Product, Taxonomy,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const CACHE_FILE_NAME: &str = ".classify-cache.json";

/// キャッシュに残す最大件数（超えたら古いものから捨てる）
pub const MAX_CACHE_ENTRIES: usize = 64;

/// 分類結果キャッシュ（キャッシュトークン → 出力）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCache {
    /// バージョン（互換性チェック用）
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub created_at: String,
    #[serde(rename = "categorizedProducts")]
    pub categorized_products: Vec<CategorizedProduct>,
}

impl ResultCache {
    const CURRENT_VERSION: u32 = 1;

    /// キャッシュファイルを読み込み（読めなければ空）
    pub fn load(dir: &Path) -> Self {
        let cache_path = dir.join(CACHE_FILE_NAME);
        if !cache_path.exists() {
            return Self::default();
        }

        let file = match File::open(&cache_path) {
            Ok(f) => f,
            Err(_) => return Self::default(),
        };

        match serde_json::from_reader::<_, ResultCache>(BufReader::new(file)) {
            Ok(cache) if cache.version == Self::CURRENT_VERSION => cache,
            Ok(_) => {
                tracing::warn!(path = %cache_path.display(), "キャッシュバージョン不一致、再生成します");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %cache_path.display(), error = %e, "キャッシュを読めません、再生成します");
                Self::default()
            }
        }
    }

    pub fn cache_path(dir: &Path) -> PathBuf {
        dir.join(CACHE_FILE_NAME)
    }

    /// キャッシュファイルを削除（存在しなければ false）
    pub fn clear(dir: &Path) -> Result<bool> {
        let cache_path = Self::cache_path(dir);
        if !cache_path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(cache_path)?;
        Ok(true)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let file = File::create(dir.join(CACHE_FILE_NAME))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn get(&self, token: &str) -> Option<&CacheEntry> {
        self.entries.get(token)
    }

    pub fn insert(&mut self, token: String, categorized_products: Vec<CategorizedProduct>) {
        self.entries.insert(
            token,
            CacheEntry {
                created_at: chrono::Utc::now().to_rfc3339(),
                categorized_products,
            },
        );
    }

    /// `max_entries` を超えた分を created_at の古い順に捨て、捨てた件数を返す
    pub fn prune(&mut self, max_entries: usize) -> usize {
        if self.entries.len() <= max_entries {
            return 0;
        }
        let mut by_age: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|(token, entry)| (entry.created_at.clone(), token.clone()))
            .collect();
        by_age.sort();

        let excess = self.entries.len() - max_entries;
        for (_, token) in by_age.into_iter().take(excess) {
            self.entries.remove(&token);
        }
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: HashMap::new(),
        }
    }
}

/// 入力JSONを読む
///
/// `{products, existing_cache_token?}` または商品の配列をそのまま受け付ける。
pub fn parse_request(content: &str) -> Result<PipelineRequest> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.is_array() {
        let products: Vec<Product> = serde_json::from_value(value)?;
        return Ok(PipelineRequest {
            products,
            existing_cache_token: None,
        });
    }
    Ok(serde_json::from_value(value)?)
}

/// 入力と参照データから決まるキャッシュトークン（SHA-256 の16進）
pub fn compute_cache_token(
    products: &[Product],
    taxonomy: &Taxonomy,
    dual_map: &DualCategoryMap,
    corrections: &CorrectionMap,
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(products)?);
    hasher.update(b"\x1e");
    hasher.update(serde_json::to_vec(&taxonomy.to_json_value())?);
    hasher.update(b"\x1e");
    hasher.update(serde_json::to_vec(dual_map)?);
    hasher.update(b"\x1e");
    hasher.update(serde_json::to_vec(&corrections.sorted())?);
    Ok(hex::encode(hasher.finalize()))
}

/// 実行統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub pre_classified: usize,
    pub classified: usize,
    pub failed: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub response: PipelineResponse,
    pub stats: RunStats,
}

pub struct Pipeline {
    taxonomy: Arc<Taxonomy>,
    dual_map: Arc<DualCategoryMap>,
    store: Arc<dyn CorrectionStore>,
    oracle: OracleClient,
    audit: Arc<AuditLog>,
    validator: TripleValidator,
    dual: DualCategorizer,
    fuzzy_match: bool,
    cache_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        dual_map: Arc<DualCategoryMap>,
        store: Arc<dyn CorrectionStore>,
        oracle: OracleClient,
        audit: Arc<AuditLog>,
    ) -> Self {
        let validator = TripleValidator::new(taxonomy.clone(), audit.clone());
        let dual = DualCategorizer::new(
            taxonomy.clone(),
            dual_map.clone(),
            audit.clone(),
            DEFAULT_CHUNK_SIZE,
        );
        Self {
            taxonomy,
            dual_map,
            store,
            oracle,
            audit,
            validator,
            dual,
            fuzzy_match: true,
            cache_dir: None,
        }
    }

    /// 設定ファイルのパスから組み立てる
    ///
    /// タクソノミーが読めなければ起動しない。二重カテゴリマップは任意。
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        if !config.taxonomy_path.exists() {
            return Err(ClassifierError::FileNotFound(
                config.taxonomy_path.display().to_string(),
            ));
        }
        let taxonomy = Arc::new(Taxonomy::from_file(&config.taxonomy_path)?);

        let dual_map = if config.dual_map_path.exists() {
            DualCategoryMap::from_file(&config.dual_map_path)?
        } else {
            tracing::info!(path = %config.dual_map_path.display(), "二重カテゴリマップなし");
            DualCategoryMap::default()
        };

        let audit = Arc::new(AuditLog::to_dir(&config.audit_dir));
        let store = Arc::new(JsonCorrectionStore::new(&config.correction_map_path));
        let mut oracle = OracleClient::from_config(config, transport, audit.clone());
        if let Some(path) = &config.category_constraints_path {
            oracle = oracle.with_constraints(CategoryConstraints::from_file(path)?);
        }

        Ok(Self::new(taxonomy, Arc::new(dual_map), store, oracle, audit)
            .with_fuzzy_match(config.fuzzy_match)
            .with_product_type_chunk_size(config.product_type_chunk_size)
            .with_cache_dir(config.cache_dir.clone()))
    }

    pub fn with_fuzzy_match(mut self, enabled: bool) -> Self {
        self.fuzzy_match = enabled;
        self
    }

    pub fn with_product_type_chunk_size(mut self, chunk_size: usize) -> Self {
        self.dual = DualCategorizer::new(
            self.taxonomy.clone(),
            self.dual_map.clone(),
            self.audit.clone(),
            chunk_size,
        );
        self
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineResponse> {
        Ok(self.run_with_progress(request, |_, _| {}).await?.response)
    }

    /// パイプラインを実行する
    ///
    /// `on_progress(処理済み, 対象件数)` はオラクルのバッチごとに呼ばれる。
    pub async fn run_with_progress<F>(&self, request: PipelineRequest, on_progress: F) -> Result<PipelineReport>
    where
        F: Fn(usize, usize),
    {
        let products = request.products;
        let corrections = self.store.load()?;
        let cache_token = compute_cache_token(&products, &self.taxonomy, &self.dual_map, &corrections)?;

        let mut stats = RunStats {
            total: products.len(),
            ..Default::default()
        };

        if let Some(cached) = self.cached_response(request.existing_cache_token.as_deref(), &cache_token) {
            tracing::info!(token = %cache_token, "キャッシュ済みの分類結果を返します");
            stats.classified = cached.len();
            stats.from_cache = true;
            return Ok(PipelineReport {
                response: PipelineResponse {
                    categorized_products: cached,
                    cache_token,
                },
                stats,
            });
        }

        // 修正マップで既知の商品を先に確定
        let mut slots: Vec<Option<CategorizedProduct>> = vec![None; products.len()];
        let mut unknown = Vec::new();
        for (i, product) in products.iter().enumerate() {
            match corrections.resolve(product, self.fuzzy_match, &self.audit) {
                Some(entry) => {
                    let triple = self.validator.finalize(&entry, product);
                    slots[i] = Some(CorrectionMap::apply(product, &triple));
                    stats.pre_classified += 1;
                }
                None => unknown.push(i),
            }
        }
        tracing::info!(
            total = products.len(),
            pre_classified = stats.pre_classified,
            to_classify = unknown.len(),
            "修正マップを適用"
        );

        let plan = split_plan(unknown.len(), self.oracle.max_batch());
        stats.batches = plan.len();
        let mut done = 0;

        for (b, range) in plan.iter().enumerate() {
            if b > 0 {
                pause(self.oracle.policy().inter_batch_delay()).await;
            }
            let indices = &unknown[range.clone()];
            let batch: Vec<Product> = indices.iter().map(|&i| products[i].clone()).collect();
            tracing::debug!(batch = b + 1, of = plan.len(), size = batch.len(), "バッチ送信");

            match self.oracle.submit(&batch, &self.taxonomy).await {
                Ok(raws) => {
                    for (&i, raw) in indices.iter().zip(raws) {
                        let product = &products[i];
                        let triple = self.validator.finalize(&raw.to_triple(), product);
                        let result = ClassificationResult::new(&product.product_ref(), triple);
                        slots[i] = Some(CategorizedProduct::new(product.clone(), result, false));
                        stats.classified += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(batch = b + 1, size = batch.len(), error = %e, "バッチ失敗、出力から除外");
                    let context = format!("batch {}/{} failed", b + 1, plan.len());
                    for product in &batch {
                        self.audit.append(AuditRecord::failure(
                            product,
                            &context,
                            Some(e.to_string()),
                            None,
                        ));
                    }
                    stats.failed += batch.len();
                    stats.failed_batches += 1;
                }
            }

            done += batch.len();
            on_progress(done, unknown.len());
        }

        let mut categorized: Vec<CategorizedProduct> = slots.into_iter().flatten().collect();
        self.dual.apply(&mut categorized, &self.oracle).await;

        // 失敗バッチを含む出力は次回再分類させる
        if stats.failed_batches == 0 {
            self.store_in_cache(&cache_token, &categorized);
        } else {
            tracing::info!(failed_batches = stats.failed_batches, "失敗バッチがあるためキャッシュしません");
        }

        Ok(PipelineReport {
            response: PipelineResponse {
                categorized_products: categorized,
                cache_token,
            },
            stats,
        })
    }

    fn cached_response(&self, existing: Option<&str>, token: &str) -> Option<Vec<CategorizedProduct>> {
        let dir = self.cache_dir.as_ref()?;
        if existing? != token {
            return None;
        }
        ResultCache::load(dir)
            .get(token)
            .map(|entry| entry.categorized_products.clone())
    }

    fn store_in_cache(&self, token: &str, categorized: &[CategorizedProduct]) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let mut cache = ResultCache::load(dir);
        cache.insert(token.to_string(), categorized.to_vec());
        let evicted = cache.prune(MAX_CACHE_ENTRIES);
        if evicted > 0 {
            tracing::debug!(evicted, "古いキャッシュを削除");
        }
        if let Err(e) = cache.save(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "キャッシュを保存できません");
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
