// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use super::error::SshError;
use crate::constants::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_KEEPALIVE_SECS};
use crate::models::{HostRecord, Options, Proxy};

pub const OPT_CONNECT_TIMEOUT: &str = "ConnectTimeout";
pub const OPT_SERVER_ALIVE_INTERVAL: &str = "ServerAliveInterval";

/// 主机密钥校验策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// 对照 known_hosts 校验，未知主机自动记录，密钥变化时拒绝
    #[default]
    AcceptNew,
    /// 只接受 known_hosts 中已有的主机
    Strict,
    /// 不做任何校验（需显式开启）
    Insecure,
}

/// 主机密钥校验配置
#[derive(Clone, Debug, Default)]
pub struct HostKeyConfig {
    pub policy: HostKeyPolicy,
    /// 为空时使用 ~/.ssh/known_hosts
    pub known_hosts: Option<PathBuf>,
}

/// 代理类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProxyType {
    #[default]
    Socks5,
}

/// 代理配置
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// 代理类型
    pub proxy_type: ProxyType,
    /// 代理主机
    pub host: String,
    /// 代理端口
    pub port: u16,
    /// 认证信息（用户名, 密码）
    pub auth: Option<(String, String)>,
}

impl ProxyConfig {
    pub fn from_group_proxy(proxy: &Proxy) -> Result<Self, SshError> {
        if !proxy.proxy_type.eq_ignore_ascii_case("socks5") {
            return Err(SshError::Proxy(format!(
                "unsupported proxy type '{}'",
                proxy.proxy_type
            )));
        }
        let port = u16::try_from(proxy.port)
            .map_err(|_| SshError::Proxy(format!("invalid proxy port {}", proxy.port)))?;
        let auth = if proxy.user.is_empty() {
            None
        } else {
            Some((proxy.user.clone(), proxy.password.clone()))
        };
        Ok(Self {
            proxy_type: ProxyType::Socks5,
            host: proxy.server.clone(),
            port,
            auth,
        })
    }
}

/// 一次拨号所需的全部信息
#[derive(Clone, Debug)]
pub struct DialTarget {
    pub host: HostRecord,
    pub port: u16,
    pub proxy: Option<ProxyConfig>,
    pub connect_timeout: Duration,
}

impl DialTarget {
    pub fn new(host: &HostRecord, proxy: Option<&Proxy>) -> Result<Self, SshError> {
        let port = u16::try_from(host.port)
            .map_err(|_| SshError::Dial(format!("invalid port {}", host.port)))?;
        let proxy = proxy.map(ProxyConfig::from_group_proxy).transpose()?;
        Ok(Self {
            host: host.clone(),
            port,
            proxy,
            connect_timeout: connect_timeout(&host.options),
        })
    }

    /// 连接池键
    pub fn key(&self) -> String {
        self.host.connection_key()
    }
}

fn as_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// ConnectTimeout，缺省或无效时 30 秒
pub fn connect_timeout(options: &Options) -> Duration {
    let secs = options
        .get(OPT_CONNECT_TIMEOUT)
        .and_then(as_seconds)
        .filter(|s| *s > 0)
        .map(|s| s as u64)
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// ServerAliveInterval：未设置（或为 null）时不启用心跳，非数字按 60 秒，非正数视为关闭
pub fn keepalive_interval(options: &Options) -> Option<Duration> {
    let value = options.get(OPT_SERVER_ALIVE_INTERVAL)?;
    if value.is_null() {
        return None;
    }
    match as_seconds(value) {
        Some(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
        Some(_) => None,
        None => Some(Duration::from_secs(DEFAULT_KEEPALIVE_SECS)),
    }
}

/// 构建 russh 配置
///
/// 心跳由会话层按 ServerAliveInterval 自行发送，这里不开启 russh 内置心跳，
/// 也不设置不活动超时，池中空闲连接依靠探测判断存活。
pub fn russh_config() -> russh::client::Config {
    let mut config = russh::client::Config::default();
    config.inactivity_timeout = None;
    config
}
