//! 分類オラクルクライアント
//!
//! 商品記述子とタクソノミーをまとめて外部の分類サービスに送り、
//! 生の (カテゴリ, サブカテゴリ, 商品タイプ) を受け取る。
//!
//! - MAX_BATCH を超えるバッチは半分ずつ分割（キューで処理、再帰なし）
//! - 失敗時は指数バックオフで再試行
//! - 応答件数の不一致はプレースホルダーで補完して監査ログへ

pub mod backoff;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use transport::{CliTransport, GeminiTransport, Transport};

use crate::audit::{AuditLog, AuditRecord};
use crate::config::{Config, MAX_BATCH};
use grocery_classifier_common::{
    build_classification_prompt, build_product_type_prompt, clean_description, CategoryConstraints,
    parse_classification_response, parse_product_type_response, Product, ProductDescriptor,
    ProductTypeRequest, RawClassification, Taxonomy,
};
use std::collections::{HashSet, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("通信エラー: {0}")]
    Transport(String),

    #[error("応答の解析に失敗: {0}")]
    Parse(String),

    #[error("{attempts}回試行して失敗: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// 長さ len の入力を max_batch 以下の連続区間に分割する
///
/// 超過した区間は前半を切り上げて二分する（45件/20 → 12, 11, 11, 11）。
pub fn split_plan(len: usize, max_batch: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let max_batch = max_batch.max(1);

    let mut queue = VecDeque::from([0..len]);
    let mut plan = Vec::new();
    while let Some(range) = queue.pop_front() {
        if range.len() <= max_batch {
            plan.push(range);
            continue;
        }
        let mid = range.start + range.len().div_ceil(2);
        queue.push_front(mid..range.end);
        queue.push_front(range.start..mid);
    }
    plan
}

pub struct OracleClient {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    product_type_policy: BackoffPolicy,
    max_batch: usize,
    constraints: Arc<CategoryConstraints>,
    audit: Arc<AuditLog>,
}

impl OracleClient {
    pub fn new(transport: Arc<dyn Transport>, audit: Arc<AuditLog>) -> Self {
        Self::from_config(&Config::default(), transport, audit)
    }

    pub fn from_config(config: &Config, transport: Arc<dyn Transport>, audit: Arc<AuditLog>) -> Self {
        Self {
            transport,
            policy: config.primary_backoff(),
            product_type_policy: config.product_type_backoff(),
            max_batch: config.max_batch,
            constraints: Arc::new(CategoryConstraints::builtin()),
            audit,
        }
    }

    /// 仕入先カテゴリの候補表を差し替える
    pub fn with_constraints(mut self, constraints: CategoryConstraints) -> Self {
        self.constraints = Arc::new(constraints);
        self
    }

    pub fn with_policies(mut self, primary: BackoffPolicy, product_type: BackoffPolicy) -> Self {
        self.policy = primary;
        self.product_type_policy = product_type;
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = if max_batch == 0 { MAX_BATCH } else { max_batch };
        self
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn product_type_policy(&self) -> &BackoffPolicy {
        &self.product_type_policy
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// バッチを分類する
    ///
    /// 返り値は入力と同じ件数・同じ順序。いずれかの分割バッチが
    /// リトライ上限に達した場合はバッチ全体がエラーになる。
    pub async fn submit(
        &self,
        batch: &[Product],
        taxonomy: &Taxonomy,
    ) -> Result<Vec<RawClassification>, OracleError> {
        let plan = split_plan(batch.len(), self.max_batch);
        if plan.len() > 1 {
            tracing::info!(
                products = batch.len(),
                sub_batches = plan.len(),
                "バッチを分割して送信"
            );
        }

        let mut results = Vec::with_capacity(batch.len());
        for (i, range) in plan.into_iter().enumerate() {
            if i > 0 {
                pause(self.policy.inter_batch_delay()).await;
            }
            let offset = range.start;
            let raw = self.submit_chunk(&batch[range], offset, taxonomy).await?;
            results.extend(raw);
        }
        Ok(results)
    }

    async fn submit_chunk(
        &self,
        chunk: &[Product],
        offset: usize,
        taxonomy: &Taxonomy,
    ) -> Result<Vec<RawClassification>, OracleError> {
        let descriptors: Vec<ProductDescriptor> = chunk
            .iter()
            .enumerate()
            .map(|(i, p)| ProductDescriptor {
                index: i,
                description: clean_description(&p.description),
                brand: p.brand.clone(),
                source_categories: p.categories.clone(),
                candidate_categories: self.constraints.candidates(&p.categories, taxonomy),
            })
            .collect();
        let prompt = build_classification_prompt(&descriptors, taxonomy);
        let operation = format!("classify[{}..{}]", offset, offset + chunk.len());

        let transport = self.transport.as_ref();
        let prompt = prompt.as_str();
        let raw = self
            .policy
            .retry(&operation, move |_| async move {
                let response = transport.complete(prompt).await?;
                parse_classification_response(&response).map_err(|e| OracleError::Parse(e.to_string()))
            })
            .await?;

        let aligned = align_by_index(raw, chunk.len(), |r| r.index);
        let returned = aligned.returned;
        if returned != chunk.len() {
            tracing::warn!(
                batch = %operation,
                expected = chunk.len(),
                returned,
                "オラクル応答の件数が一致しません"
            );
            if returned > chunk.len() {
                if let Some(first) = chunk.first() {
                    self.audit.append(AuditRecord::ambiguous(
                        first,
                        format!(
                            "oracle returned {} items for {} products; extra items dropped",
                            returned,
                            chunk.len()
                        ),
                    ));
                }
            }
        }

        let results = aligned
            .slots
            .into_iter()
            .zip(chunk)
            .enumerate()
            .map(|(i, (slot, product))| {
                let mut raw = match slot {
                    Some(raw) => raw,
                    None => {
                        self.audit.append(AuditRecord::ambiguous(
                            product,
                            format!(
                                "oracle returned {} items for {} products; padded with placeholder",
                                returned,
                                chunk.len()
                            ),
                        ));
                        RawClassification::placeholder(i)
                    }
                };
                raw.index = Some(offset + i);
                raw
            })
            .collect();
        Ok(results)
    }

    /// 商品タイプのみを判定する
    ///
    /// 返り値はリクエストと同じ件数。回答が欠けた位置は None。
    pub async fn submit_product_types(
        &self,
        requests: &[ProductTypeRequest],
    ) -> Result<Vec<Option<String>>, OracleError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_product_type_prompt(requests);
        let transport = self.transport.as_ref();
        let prompt = prompt.as_str();
        let answers = self
            .product_type_policy
            .retry("product_types", move |_| async move {
                let response = transport.complete(prompt).await?;
                parse_product_type_response(&response).map_err(|e| OracleError::Parse(e.to_string()))
            })
            .await?;

        let aligned = align_by_index(answers, requests.len(), |a| a.index);
        if aligned.returned != requests.len() {
            tracing::warn!(
                expected = requests.len(),
                returned = aligned.returned,
                "商品タイプ応答の件数が一致しません"
            );
        }

        Ok(aligned
            .slots
            .into_iter()
            .map(|slot| slot.map(|a| a.product_type).filter(|pt| !pt.trim().is_empty()))
            .collect())
    }
}

struct Aligned<T> {
    slots: Vec<Option<T>>,
    returned: usize,
}

/// 応答をリクエストの位置に並べる
///
/// 全要素が重複なく範囲内の index を持つ場合は index で配置し、
/// それ以外は返ってきた順に詰める。
fn align_by_index<T>(items: Vec<T>, expected: usize, index_of: impl Fn(&T) -> Option<usize>) -> Aligned<T> {
    let returned = items.len();
    let mut slots: Vec<Option<T>> = (0..expected).map(|_| None).collect();

    let mut seen = HashSet::new();
    let indexed = !items.is_empty()
        && items
            .iter()
            .all(|item| matches!(index_of(item), Some(i) if i < expected && seen.insert(i)));

    if indexed {
        for item in items {
            if let Some(i) = index_of(&item) {
                slots[i] = Some(item);
            }
        }
    } else {
        for (slot, item) in slots.iter_mut().zip(items) {
            *slot = Some(item);
        }
    }

    Aligned { slots, returned }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
