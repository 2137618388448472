// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait，负责主机密钥校验

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::config::{HostKeyConfig, HostKeyPolicy};
use super::known_hosts::{self, HostKeyStatus};

/// SSH 客户端 Handler
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
    /// 公钥被拒绝时置位，握手失败后据此区分主机密钥错误
    rejected: Arc<AtomicBool>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, host_keys: &HostKeyConfig) -> Self {
        Self {
            host,
            port,
            policy: host_keys.policy,
            known_hosts: host_keys
                .known_hosts
                .clone()
                .or_else(known_hosts::default_known_hosts_path),
            rejected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn rejection_flag(&self) -> Arc<AtomicBool> {
        self.rejected.clone()
    }

    fn lookup(&self, key: &PublicKey) -> HostKeyStatus {
        let Some(path) = &self.known_hosts else {
            return HostKeyStatus::Unknown;
        };
        match known_hosts::check(path, &self.host, self.port, key) {
            Ok(HostKeyStatus::Changed) => {
                warn!(
                    "[SSH] Host key for {}:{} differs from {}",
                    self.host,
                    self.port,
                    path.display()
                );
                HostKeyStatus::Changed
            }
            Ok(status) => status,
            Err(e) => {
                // known_hosts 无法读取，按未知主机处理
                debug!("[SSH] known_hosts lookup failed: {}", e);
                HostKeyStatus::Unknown
            }
        }
    }

    fn learn(&self, key: &PublicKey) {
        let Some(path) = &self.known_hosts else {
            return;
        };
        match known_hosts::learn(path, &self.host, self.port, key) {
            Ok(()) => info!("[SSH] Added {}:{} to {}", self.host, self.port, path.display()),
            Err(e) => warn!("[SSH] Failed to record host key: {}", e),
        }
    }

    /// 按策略决定是否接受服务器公钥
    fn verify(&self, key: &PublicKey) -> bool {
        if self.policy == HostKeyPolicy::Insecure {
            warn!(
                "[SSH] Host key verification disabled for {}:{}",
                self.host, self.port
            );
            return true;
        }
        match (self.lookup(key), self.policy) {
            (HostKeyStatus::Match, _) => true,
            (HostKeyStatus::Changed, _) => false,
            (HostKeyStatus::Unknown, HostKeyPolicy::Strict) => {
                warn!(
                    "[SSH] {}:{} is not in known_hosts, refusing in strict mode",
                    self.host, self.port
                );
                false
            }
            (HostKeyStatus::Unknown, _) => {
                self.learn(key);
                true
            }
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);
        debug!(
            "[SSH] Server key {} fingerprint: {}",
            server_public_key.algorithm(),
            fingerprint
        );

        let accepted = self.verify(server_public_key);
        if !accepted {
            self.rejected.store(true, Ordering::SeqCst);
        }
        async move { Ok(accepted) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(policy: HostKeyPolicy, known_hosts: PathBuf) -> ClientHandler {
        ClientHandler::new(
            "example.test".into(),
            22,
            &HostKeyConfig {
                policy,
                known_hosts: Some(known_hosts),
            },
        )
    }

    fn sample_key() -> PublicKey {
        PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ",
        )
        .expect("public key")
    }

    #[test]
    fn strict_rejects_unknown_host() {
        let dir = tempfile::tempdir().expect("tempdir");
        let h = handler(HostKeyPolicy::Strict, dir.path().join("known_hosts"));
        assert!(!h.verify(&sample_key()));
    }

    #[test]
    fn insecure_accepts_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("known_hosts");
        let h = handler(HostKeyPolicy::Insecure, path.clone());
        assert!(h.verify(&sample_key()));
        assert!(!path.exists());
    }

    #[test]
    fn accept_new_learns_then_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("known_hosts");
        let h = handler(HostKeyPolicy::AcceptNew, path.clone());
        assert!(h.verify(&sample_key()));
        assert!(path.exists());

        let strict = handler(HostKeyPolicy::Strict, path);
        assert!(strict.verify(&sample_key()));
    }
}
