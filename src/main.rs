// HostDeck - SSH 主机目录与快速连接工具
// 应用入口

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

mod constants;
mod menu;
mod models;
mod services;
mod ssh;

use constants::POOL_SWEEP_INTERVAL;
use menu::Menu;
use models::{Catalog, CatalogError};
use services::storage;
use ssh::{ConnectionPool, HostKeyConfig, HostKeyPolicy, RusshConnector, SessionController, StdinPump};

/// 命令行参数
#[derive(Debug, Parser)]
#[command(name = "hostdeck", version, about = "SSH host catalog and quick connect")]
struct Cli {
    /// 目录文件路径
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 不校验主机密钥
    #[arg(long, visible_alias = "skip-host-key-check", conflicts_with = "strict_host_keys")]
    insecure: bool,

    /// 只接受 known_hosts 中已有的主机
    #[arg(long)]
    strict_host_keys: bool,

    /// known_hosts 文件路径
    #[arg(long, value_name = "PATH")]
    known_hosts: Option<PathBuf>,

    /// 输出调试日志
    #[arg(long)]
    debug: bool,

    /// 启动后直接连接的主机（编号 / 分组编号 / 别名）
    token: Option<String>,
}

impl Cli {
    fn host_keys(&self) -> HostKeyConfig {
        let policy = if self.insecure {
            HostKeyPolicy::Insecure
        } else if self.strict_host_keys {
            HostKeyPolicy::Strict
        } else {
            HostKeyPolicy::AcceptNew
        };
        HostKeyConfig {
            policy,
            known_hosts: self
                .known_hosts
                .as_ref()
                .map(|p| storage::expand_path(&p.to_string_lossy())),
        }
    }
}

/// 初始化日志系统
/// 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug hostdeck
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false) // 不显示 target（模块路径）
        .init();
}

/// panic 时先恢复终端模式，避免留下 raw 模式的终端
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = crossterm::terminal::disable_raw_mode();
        eprintln!("hostdeck: unexpected failure, terminal restored");
        default_hook(info);
    }));
}

/// 加载目录；文件不存在时从空目录开始，首次保存时创建
fn load_or_create(path: PathBuf) -> Result<Catalog> {
    match storage::load_catalog(&path) {
        Ok(catalog) => Ok(catalog),
        Err(CatalogError::NotFound(path)) => {
            tracing::warn!("[Catalog] {} not found, starting empty", path.display());
            let mut catalog = Catalog::with_file(path);
            catalog.prepare();
            Ok(catalog)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

fn run(cli: Cli) -> Result<()> {
    let path = match &cli.config {
        Some(path) => storage::expand_path(&path.to_string_lossy()),
        None => storage::default_catalog_path()?,
    };
    let catalog = load_or_create(path)?;

    let host_keys = cli.host_keys();
    if host_keys.policy == HostKeyPolicy::Insecure {
        tracing::warn!("[SSH] Host key verification is disabled");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ssh-worker")
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async move {
        let pool = Arc::new(ConnectionPool::new(RusshConnector::new(host_keys)));
        let sweeper = pool.start_sweeper(POOL_SWEEP_INTERVAL);
        let stdin = StdinPump::spawn().context("Failed to read from stdin")?;

        let mut menu = Menu::new(catalog, SessionController::new(pool.clone()), stdin);
        let result = menu.run(cli.token).await;

        sweeper.stop().await;
        pool.close_all().await;
        result
    })?;

    // stdin 读取线程可能仍阻塞在 read 上，不等待
    runtime.shutdown_background();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    install_panic_hook();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hostdeck: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_select_host_key_policy() {
        let cli = Cli::parse_from(["hostdeck"]);
        assert_eq!(cli.host_keys().policy, HostKeyPolicy::AcceptNew);

        let cli = Cli::parse_from(["hostdeck", "--skip-host-key-check", "p1"]);
        assert_eq!(cli.host_keys().policy, HostKeyPolicy::Insecure);
        assert_eq!(cli.token.as_deref(), Some("p1"));

        let cli = Cli::parse_from(["hostdeck", "--strict-host-keys", "-c", "/tmp/c.json"]);
        assert_eq!(cli.host_keys().policy, HostKeyPolicy::Strict);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));

        assert!(Cli::try_parse_from(["hostdeck", "--insecure", "--strict-host-keys"]).is_err());
    }

    #[test]
    fn missing_catalog_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let catalog = load_or_create(path.clone()).expect("catalog");
        assert_eq!(catalog.file(), path.as_path());
        assert!(catalog.servers.is_empty());
        assert!(!catalog.is_dirty());
    }
}
