// SSH 错误类型定义

use std::path::PathBuf;

use thiserror::Error;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 认证失败（空密码、服务器拒绝）
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 私钥文件读取失败
    #[error("Failed to read key {}: {source}", .path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 私钥解析失败（格式错误或口令不匹配）
    #[error("Key error: {0}")]
    KeyParse(String),

    /// 不支持的认证方式
    #[error("Unsupported auth method '{0}'")]
    UnsupportedMethod(String),

    /// TCP 连接失败
    #[error("Dial failed: {0}")]
    Dial(String),

    /// 代理错误
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Handshake(String),

    /// 主机密钥校验失败
    #[error("Host key verification failed: {0}")]
    HostKey(String),

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// 通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO 错误（PTY、日志文件等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Handshake(e.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::KeyParse(e.to_string())
    }
}

/// 粗粒度失败分类，调用方据此给出提示
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Dial,
    Handshake,
    Timeout,
    Io,
}

impl SshError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SshError::Auth(_)
            | SshError::KeyRead { .. }
            | SshError::KeyParse(_)
            | SshError::UnsupportedMethod(_) => FailureKind::Auth,
            SshError::Dial(_) | SshError::Proxy(_) => FailureKind::Dial,
            SshError::Handshake(_) | SshError::HostKey(_) => FailureKind::Handshake,
            SshError::Timeout(_) => FailureKind::Timeout,
            SshError::Channel(_) | SshError::Io(_) => FailureKind::Io,
        }
    }

    /// 面向用户的提示
    pub fn hint(&self) -> &'static str {
        match self.kind() {
            FailureKind::Auth => "check the user, password or key file of this host",
            FailureKind::Dial => "the host or proxy refused the connection or is unreachable",
            FailureKind::Handshake => "the SSH handshake was rejected by the remote side",
            FailureKind::Timeout => "the host did not answer in time, try raising ConnectTimeout",
            FailureKind::Io => "the session ended because of a local I/O error",
        }
    }
}
