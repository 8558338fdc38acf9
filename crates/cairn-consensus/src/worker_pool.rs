//! Bounded pool for CPU-bound signature work.
//!
//! Jobs run on tokio's blocking threads, at most `workers` at a time, so
//! signing and verification never stall the consensus control loop. A job
//! that panics or outlives the timeout counts as failed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::ConsensusConfig;

#[derive(Debug, Clone)]
pub struct CryptoPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl CryptoPool {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        CryptoPool {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self::new(config.crypto_workers, config.crypto_timeout())
    }

    /// Run a verification job. Returns `false` on timeout or worker failure.
    pub async fn verify<F>(&self, job: F) -> bool
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        self.execute(job).await.unwrap_or(false)
    }

    /// Run a signing job. Returns `None` on timeout or worker failure.
    pub async fn sign<T, F>(&self, job: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.execute(job).await
    }

    async fn execute<T, F>(&self, job: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let run = async {
            let permit = self.permits.clone().acquire_owned().await.ok()?;

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            });

            match handle.await {
                Ok(output) => Some(output),
                Err(e) => {
                    warn!("Crypto worker failed: {}", e);
                    None
                }
            }
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => output,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Crypto job timed out");
                None
            }
        }
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_job_result_is_returned() {
        let pool = CryptoPool::new(2, Duration::from_secs(1));

        assert!(pool.verify(|| true).await);
        assert!(!pool.verify(|| false).await);
        assert_eq!(pool.available_workers(), 2);
    }

    #[tokio::test]
    async fn test_slow_job_fails_closed() {
        let pool = CryptoPool::new(1, Duration::from_millis(20));

        let verified = pool
            .verify(|| {
                std::thread::sleep(Duration::from_millis(200));
                true
            })
            .await;
        assert!(!verified);
    }

    #[tokio::test]
    async fn test_panicking_job_fails_closed() {
        let pool = CryptoPool::new(1, Duration::from_secs(1));
        assert!(!pool.verify(|| panic!("bad input")).await);
    }

    #[tokio::test]
    async fn test_signing_job_returns_output() {
        let pool = CryptoPool::new(1, Duration::from_secs(1));
        let kp = cairn_core::KeyPair::from_seed(3);
        let public = kp.public;

        let signature = pool
            .sign(move || cairn_core::sign(&kp.secret, b"payload"))
            .await
            .unwrap();
        cairn_core::verify(&public, b"payload", &signature).unwrap();
    }

    #[tokio::test]
    async fn test_slow_signing_job_yields_nothing() {
        let pool = CryptoPool::new(1, Duration::from_millis(20));

        let signed = pool
            .sign(|| {
                std::thread::sleep(Duration::from_millis(200));
                7u32
            })
            .await;
        assert_eq!(signed, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let pool = CryptoPool::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..6).map(|_| {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                pool.verify(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    true
                })
                .await
            })
        });

        for job in jobs.collect::<Vec<_>>() {
            assert!(job.await.unwrap());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
