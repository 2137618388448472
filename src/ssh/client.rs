// SSH 客户端核心实现：拨号 -> 握手 -> 认证

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::time::timeout;
use tracing::{debug, info};

use super::auth::{authenticate, resolve_auth};
use super::config::{russh_config, DialTarget, HostKeyConfig};
use super::error::SshError;
use super::event::{SessionStage, StageTracker};
use super::handler::ClientHandler;
use super::pool::{Connector, Transport};
use super::proxy::{connect_direct, connect_via_proxy};

/// 已认证的 SSH 连接
pub struct SshHandle {
    handle: Handle<ClientHandler>,
    key: String,
}

impl SshHandle {
    /// 打开会话通道
    pub async fn open_session(&self) -> Result<Channel<Msg>, SshError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("Failed to open session: {}", e)))
    }
}

#[async_trait]
impl Transport for SshHandle {
    async fn probe(&self) -> bool {
        if self.handle.is_closed() {
            return false;
        }
        match self.handle.channel_open_session().await {
            Ok(channel) => {
                let _ = channel.close().await;
                true
            }
            Err(e) => {
                debug!("[SSH] Probe on {} failed: {}", self.key, e);
                false
            }
        }
    }

    async fn send_keepalive(&self) -> Result<(), SshError> {
        self.handle
            .send_keepalive(true)
            .await
            .map_err(|e| SshError::Channel(format!("keepalive: {}", e)))
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("[SSH] Disconnect {} failed: {}", self.key, e);
        }
    }
}

/// 基于 russh 的连接器
pub struct RusshConnector {
    host_keys: HostKeyConfig,
    config: Arc<russh::client::Config>,
}

impl RusshConnector {
    pub fn new(host_keys: HostKeyConfig) -> Self {
        Self {
            host_keys,
            config: Arc::new(russh_config()),
        }
    }
}

#[async_trait]
impl Connector for RusshConnector {
    type Handle = SshHandle;

    async fn connect(
        &self,
        target: &DialTarget,
        stages: &StageTracker,
    ) -> Result<SshHandle, SshError> {
        let host = &target.host;
        let timeout_secs = target.connect_timeout.as_secs();

        // 先解析凭据，本地错误无需拨号
        let proof = resolve_auth(host).await?;

        // 阶段 1: TCP 连接（直连或代理）
        stages.advance(SessionStage::Dialing);
        debug!("[SSH] Target: {}", target.key());
        let stream = match &target.proxy {
            Some(proxy) => {
                connect_via_proxy(proxy, &host.ip, target.port, target.connect_timeout).await?
            }
            None => connect_direct(&host.ip, target.port, target.connect_timeout).await?,
        };

        // 阶段 2: SSH 握手
        stages.advance(SessionStage::Handshaking);
        let handler = ClientHandler::new(host.ip.clone(), target.port, &self.host_keys);
        let rejected = handler.rejection_flag();
        let mut handle = timeout(
            target.connect_timeout,
            russh::client::connect_stream(self.config.clone(), stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(timeout_secs))?
        .map_err(|e| {
            if rejected.load(Ordering::SeqCst) {
                SshError::HostKey(format!("server key for {} was rejected", host.ip))
            } else {
                SshError::from(e)
            }
        })?;

        // 阶段 3: 认证
        stages.advance(SessionStage::Authenticating);
        timeout(
            target.connect_timeout,
            authenticate(&mut handle, &host.user, proof),
        )
        .await
        .map_err(|_| SshError::Timeout(timeout_secs))??;

        info!("[SSH] Authenticated as {}", target.key());
        Ok(SshHandle {
            handle,
            key: target.key(),
        })
    }
}
