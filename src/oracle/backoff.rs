//! 指数バックオフ付きリトライ
//!
//! k回目の失敗後は base·2^(k-1) 待ってから再試行する。
//! 試行回数は初回を含めて max_attempts 回まで。

use super::OracleError;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    base_delay: Duration,
    inter_batch_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, inter_batch_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            inter_batch_delay,
        }
    }

    /// 待ち時間なし（テスト用）
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// バッチ間の待ち時間
    pub fn inter_batch_delay(&self) -> Duration {
        self.inter_batch_delay
    }

    /// attempt 回目（1始まり）の失敗後の待ち時間
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// 操作を成功するまで再試行する
    pub async fn retry<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, OracleError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            "リトライ後に成功"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= self.max_attempts => {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "リトライ上限に到達"
                    );
                    return Err(OracleError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "オラクル呼び出し失敗、再試行します"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delays() {
        let policy = BackoffPolicy::new(5, Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(BackoffPolicy::immediate(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::immediate(5);

        let result = policy
            .retry("test_op", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(OracleError::Transport("timeout".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::immediate(5);

        let result: Result<(), _> = policy
            .retry("test_op", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OracleError::Transport("connection refused".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(OracleError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 5);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
