// 连接池：按 user@host:port 复用已认证的 SSH 连接

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::config::DialTarget;
use super::error::SshError;
use super::event::StageTracker;
use super::tasks::BackgroundTask;
use crate::constants::PROBE_TIMEOUT;

/// 已认证的传输连接
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 存活探测（打开并关闭一个会话通道）
    async fn probe(&self) -> bool;

    /// 发送一次带回复的心跳请求
    async fn send_keepalive(&self) -> Result<(), SshError>;

    /// 断开连接
    async fn close(&self);
}

/// 拨号 + 握手 + 认证，产出 Transport
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Transport;

    async fn connect(
        &self,
        target: &DialTarget,
        stages: &StageTracker,
    ) -> Result<Self::Handle, SshError>;
}

async fn probe_with_timeout<T: Transport + ?Sized>(transport: &T) -> bool {
    tokio::time::timeout(PROBE_TIMEOUT, transport.probe())
        .await
        .unwrap_or(false)
}

/// 连接池
///
/// 同一个键的多个会话共享同一条连接；探测失败的连接被移出并关闭。
pub struct ConnectionPool<C: Connector> {
    connector: C,
    entries: RwLock<HashMap<String, Arc<C::Handle>>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<C::Handle>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<C::Handle>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 获取连接：命中且探测通过则复用，否则重新拨号并放入池中
    pub async fn acquire(
        &self,
        target: &DialTarget,
        stages: &StageTracker,
    ) -> Result<Arc<C::Handle>, SshError> {
        let key = target.key();
        let cached = self.read().get(&key).cloned();

        if let Some(handle) = cached {
            if probe_with_timeout(handle.as_ref()).await {
                debug!("[Pool] Reusing connection {}", key);
                return Ok(handle);
            }
            warn!("[Pool] Connection {} failed liveness probe, reconnecting", key);
            self.evict(&key, &handle).await;
        }

        let handle = Arc::new(self.connector.connect(target, stages).await?);
        self.write().insert(key.clone(), handle.clone());
        info!("[Pool] New connection {}", key);
        Ok(handle)
    }

    /// 仅当池中仍是同一条连接时才移除并关闭
    async fn evict(&self, key: &str, handle: &Arc<C::Handle>) {
        let removed = {
            let mut entries = self.write();
            match entries.get(key) {
                Some(current) if Arc::ptr_eq(current, handle) => entries.remove(key),
                _ => None,
            }
        };
        if let Some(stale) = removed {
            stale.close().await;
            debug!("[Pool] Closed stale connection {}", key);
        }
    }

    /// 探测全部连接并清理失效项，返回清理数量
    pub async fn sweep(&self) -> usize {
        let snapshot: Vec<(String, Arc<C::Handle>)> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut evicted = 0;
        for (key, handle) in snapshot {
            if !probe_with_timeout(handle.as_ref()).await {
                self.evict(&key, &handle).await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(
                "[Pool] Sweep removed {} dead connections, {} left",
                evicted,
                self.len()
            );
        }
        evicted
    }

    /// 启动周期清理任务，池被释放后任务自行退出
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> BackgroundTask {
        let pool: Weak<Self> = Arc::downgrade(self);
        BackgroundTask::spawn("pool-sweeper", move |mut stop| async move {
            let mut ticker = tokio::time::interval(every);
            // interval 的第一次 tick 立即返回，跳过
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.sweep().await;
                    }
                }
            }
        })
    }

    /// 关闭并清空全部连接
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<C::Handle>)> = self.write().drain().collect();
        for (key, handle) in drained {
            handle.close().await;
            debug!("[Pool] Closed {}", key);
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }
}

/// 测试用的内存 Transport / Connector
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockTransport {
        pub alive: Arc<AtomicBool>,
        pub closed: AtomicBool,
        pub keepalives: AtomicUsize,
    }

    impl MockTransport {
        pub fn alive() -> Self {
            Self {
                alive: Arc::new(AtomicBool::new(true)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn probe(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn send_keepalive(&self) -> Result<(), SshError> {
            self.keepalives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct MockConnector {
        pub dials: AtomicUsize,
        pub fail: AtomicBool,
        /// 每次拨号产生的 alive 开关，测试中可手动置为失效
        pub switches: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl MockConnector {
        pub fn kill(&self, index: usize) {
            let switches = self.switches.lock().expect("switches");
            switches[index].store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Handle = MockTransport;

        async fn connect(
            &self,
            _target: &DialTarget,
            _stages: &StageTracker,
        ) -> Result<MockTransport, SshError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SshError::Dial("connection refused".into()));
            }
            let transport = MockTransport::alive();
            self.switches
                .lock()
                .expect("switches")
                .push(transport.alive.clone());
            Ok(transport)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::MockConnector;
    use super::*;
    use crate::models::HostRecord;

    fn target(user: &str, ip: &str) -> DialTarget {
        let host = HostRecord {
            name: ip.into(),
            ip: ip.into(),
            port: 22,
            user: user.into(),
            password: "x".into(),
            method: "password".into(),
            ..Default::default()
        };
        DialTarget::new(&host, None).expect("target")
    }

    #[tokio::test]
    async fn live_connection_is_reused() {
        let pool = ConnectionPool::new(MockConnector::default());
        let stages = StageTracker::new();
        let a = pool.acquire(&target("root", "10.0.0.1"), &stages).await.expect("a");
        let b = pool.acquire(&target("root", "10.0.0.1"), &stages).await.expect("b");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.connector.dials.load(Ordering::SeqCst), 1);
        assert!(pool.contains("root@10.0.0.1:22"));
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_connections() {
        let pool = ConnectionPool::new(MockConnector::default());
        let stages = StageTracker::new();
        pool.acquire(&target("root", "10.0.0.1"), &stages).await.expect("a");
        pool.acquire(&target("admin", "10.0.0.1"), &stages).await.expect("b");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dead_connection_is_replaced_and_closed() {
        let pool = ConnectionPool::new(MockConnector::default());
        let stages = StageTracker::new();
        let first = pool.acquire(&target("root", "10.0.0.1"), &stages).await.expect("first");
        pool.connector.kill(0);

        let second = pool.acquire(&target("root", "10.0.0.1"), &stages).await.expect("second");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.closed.load(Ordering::SeqCst));
        assert_eq!(pool.connector.dials.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn failed_dial_leaves_pool_empty() {
        let pool = ConnectionPool::new(MockConnector::default());
        pool.connector.fail.store(true, Ordering::SeqCst);
        let result = pool.acquire(&target("root", "10.0.0.1"), &StageTracker::new()).await;
        assert!(matches!(result, Err(SshError::Dial(_))));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_dead_entries() {
        let pool = ConnectionPool::new(MockConnector::default());
        let stages = StageTracker::new();
        let dead = pool.acquire(&target("root", "10.0.0.1"), &stages).await.expect("a");
        pool.acquire(&target("root", "10.0.0.2"), &stages).await.expect("b");
        pool.connector.kill(0);

        assert_eq!(pool.sweep().await, 1);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains("root@10.0.0.2:22"));
        assert!(dead.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn sweeper_runs_periodically_until_stopped() {
        let pool = Arc::new(ConnectionPool::new(MockConnector::default()));
        let stages = StageTracker::new();
        pool.acquire(&target("root", "10.0.0.1"), &stages).await.expect("a");
        pool.connector.kill(0);

        let sweeper = pool.start_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(pool.is_empty());
        sweeper.stop().await;
    }

    #[tokio::test]
    async fn close_all_drains_pool() {
        let pool = ConnectionPool::new(MockConnector::default());
        let handle = pool
            .acquire(&target("root", "10.0.0.1"), &StageTracker::new())
            .await
            .expect("a");
        pool.close_all().await;
        assert!(pool.is_empty());
        assert!(handle.closed.load(Ordering::SeqCst));
    }
}
