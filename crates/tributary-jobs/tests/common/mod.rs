//! Common test infrastructure for queue and worker integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;
use tributary_config::RedisSettings;
use tributary_jobs::{
    CursorConfig, Delivery, Headers, JobError, JobHandle, JobResult, JobSource, LogConfig,
    LogService, PublishAck, RedisLog,
};

/// Poll interval used by test workers.
pub const FAST_POLL: Duration = Duration::from_millis(10);

/// Waits until `condition` holds, panicking after `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Runs `future` and panics if it takes longer than `timeout`.
pub async fn within<F: Future>(timeout: Duration, future: F) -> F::Output {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation timed out")
}

/// Log service whose sources fail the first `failures` fetches.
pub struct FlakyLog<L> {
    inner: L,
    failures: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl<L: LogService> FlakyLog<L> {
    pub fn new(inner: L, failures: usize) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(failures)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fetch calls made through every opened source.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<L: LogService> LogService for FlakyLog<L> {
    async fn ensure_log(&self, config: &LogConfig) -> JobResult<()> {
        self.inner.ensure_log(config).await
    }

    async fn create_log(&self, config: &LogConfig) -> JobResult<()> {
        self.inner.create_log(config).await
    }

    async fn ensure_cursor(&self, config: &CursorConfig) -> JobResult<()> {
        self.inner.ensure_cursor(config).await
    }

    async fn open_cursor(&self, log: &str, cursor: &str, consumer: &str) -> JobResult<Box<dyn JobSource>> {
        let inner = self.inner.open_cursor(log, cursor, consumer).await?;
        Ok(Box::new(FlakySource {
            inner,
            failures: Arc::clone(&self.failures),
            fetches: Arc::clone(&self.fetches),
        }))
    }

    async fn publish(
        &self,
        log: &str,
        subject: &str,
        payload: Vec<u8>,
        id: Option<&str>,
        headers: &Headers,
    ) -> JobResult<PublishAck> {
        self.inner.publish(log, subject, payload, id, headers).await
    }
}

struct FlakySource {
    inner: Box<dyn JobSource>,
    failures: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl JobSource for FlakySource {
    async fn fetch(&self, max: usize) -> JobResult<Vec<Box<dyn JobHandle>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(JobError::Internal("log unavailable".to_string()));
        }
        self.inner.fetch(max).await
    }
}

/// Log service whose handles fail every `acknowledge` and `terminate`.
///
/// The wrapped handles are dropped without being finalized, so their
/// entries stay pending in the inner log.
pub struct UnackableLog<L> {
    inner: L,
}

impl<L: LogService> UnackableLog<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<L: LogService> LogService for UnackableLog<L> {
    async fn ensure_log(&self, config: &LogConfig) -> JobResult<()> {
        self.inner.ensure_log(config).await
    }

    async fn create_log(&self, config: &LogConfig) -> JobResult<()> {
        self.inner.create_log(config).await
    }

    async fn ensure_cursor(&self, config: &CursorConfig) -> JobResult<()> {
        self.inner.ensure_cursor(config).await
    }

    async fn open_cursor(&self, log: &str, cursor: &str, consumer: &str) -> JobResult<Box<dyn JobSource>> {
        let inner = self.inner.open_cursor(log, cursor, consumer).await?;
        Ok(Box::new(UnackableSource { inner }))
    }

    async fn publish(
        &self,
        log: &str,
        subject: &str,
        payload: Vec<u8>,
        id: Option<&str>,
        headers: &Headers,
    ) -> JobResult<PublishAck> {
        self.inner.publish(log, subject, payload, id, headers).await
    }
}

struct UnackableSource {
    inner: Box<dyn JobSource>,
}

#[async_trait]
impl JobSource for UnackableSource {
    async fn fetch(&self, max: usize) -> JobResult<Vec<Box<dyn JobHandle>>> {
        let batch = self.inner.fetch(max).await?;
        Ok(batch
            .into_iter()
            .map(|handle| Box::new(UnackableHandle { inner: handle }) as Box<dyn JobHandle>)
            .collect())
    }
}

struct UnackableHandle {
    inner: Box<dyn JobHandle>,
}

#[async_trait]
impl JobHandle for UnackableHandle {
    fn delivery(&self) -> &Delivery {
        self.inner.delivery()
    }

    async fn acknowledge(self: Box<Self>) -> JobResult<()> {
        Err(JobError::Internal("acknowledge rejected".to_string()))
    }

    async fn terminate(self: Box<Self>) -> JobResult<()> {
        Err(JobError::Internal("terminate rejected".to_string()))
    }
}

/// Redis container wrapper.
///
/// Streams commands used by the log need Redis 6.2 or newer.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    settings: RedisSettings,
}

impl TestRedis {
    /// Starts a fresh Redis container.
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("7.2")
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let settings = RedisSettings {
            url: format!("redis://127.0.0.1:{port}"),
            pool_size: 4,
            key_prefix: "tributary-test".to_string(),
            ack_wait_ms: 200,
        };

        Self {
            _container: container,
            settings,
        }
    }

    /// Settings pointing at the container.
    pub fn settings(&self) -> &RedisSettings {
        &self.settings
    }

    /// Connects a log service to the container.
    pub async fn log(&self) -> RedisLog {
        RedisLog::connect(&self.settings)
            .await
            .expect("Failed to connect to Redis")
    }
}
