// SSH 连接模块
//
// 模块结构:
// - config: 拨号目标、代理、主机密钥策略、选项读取
// - error: 错误类型 (SshError, FailureKind)
// - auth: 认证凭据解析
// - proxy: 直连 / SOCKS5 拨号
// - known_hosts: known_hosts 读写
// - handler: russh Handler 实现
// - channel: 会话通道 (PTY、shell、数据收发)
// - client: 连接器 (拨号 -> 握手 -> 认证)
// - pool: 连接池
// - event: 会话阶段
// - tasks: 心跳、尺寸监听、日志 tee
// - terminal: 本地终端
// - session: 交互会话控制

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod known_hosts;
pub mod pool;
pub mod proxy;
pub mod session;
pub mod tasks;
pub mod terminal;

// 公开导出
pub use client::RusshConnector;
pub use config::{HostKeyConfig, HostKeyPolicy};
pub use pool::ConnectionPool;
pub use session::SessionController;
pub use terminal::StdinPump;
