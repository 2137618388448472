// 全局常量

use std::time::Duration;

// ======================== 目录 / 主机默认值 ========================

/// 默认 SSH 端口
pub const DEFAULT_PORT: i64 = 22;
/// 默认认证方式
pub const DEFAULT_METHOD: &str = "password";
/// 密钥认证时未填写路径使用的默认私钥
pub const DEFAULT_KEY_PATH: &str = "~/.ssh/id_rsa";
/// 目录文件所在的配置子目录
pub const CONFIG_DIR_NAME: &str = "hostdeck";
/// 目录文件名
pub const CATALOG_FILE_NAME: &str = "config.json";

// ======================== 备份 ========================

/// 备份文件名前缀：config-<YYYYMMDDHHMMSS>.json
pub const BACKUP_PREFIX: &str = "config-";
pub const BACKUP_SUFFIX: &str = ".json";
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
/// 保留的最大备份数
pub const BACKUP_KEEP: usize = 10;

// ======================== 连接 ========================

/// 连接超时（秒），可被 Options.ConnectTimeout 覆盖
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
/// ServerAliveInterval 存在但不是数字时的心跳间隔
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;
/// 连接池清理周期
pub const POOL_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// 连接存活探测超时
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ======================== 会话 ========================

pub const DEFAULT_TERM: &str = "xterm-256color";
/// 日志 tee 每次读取的块大小
pub const TEE_CHUNK_SIZE: usize = 4096;
/// 无 SIGWINCH 的平台上轮询终端尺寸的间隔
pub const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const TTY_SPEED: u32 = 14400;

// ======================== 交互 ========================

/// 单个字段输入无效时的最大重试次数
pub const PROMPT_MAX_ATTEMPTS: usize = 5;
