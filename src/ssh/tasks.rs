// 会话后台任务：心跳、终端尺寸监听、输出日志 tee

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pool::Transport;
use super::terminal::terminal_size;
use crate::constants::{RESIZE_POLL_INTERVAL, TEE_CHUNK_SIZE};
use crate::models::{HostRecord, LogMode};

// ======================== 任务句柄 ========================

/// 后台任务：一个停止信号 + 一个 JoinHandle
///
/// 停止信号只会发送一次；`stop` 在任务退出后才返回。
pub struct BackgroundTask {
    name: &'static str,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(body(stop_rx));
        debug!("[Session] Task '{}' started", name);
        Self {
            name,
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// 发送停止信号并等待任务结束
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            // 任务可能已经自行退出，接收端已关闭
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("[Session] Task '{}' ended abnormally: {}", self.name, e);
            }
        }
        debug!("[Session] Task '{}' stopped", self.name);
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

// ======================== 心跳 ========================

/// 按间隔发送心跳；未配置间隔时不创建任务
pub fn spawn_keepalive<T: Transport>(
    transport: Arc<T>,
    interval: Option<Duration>,
) -> Option<BackgroundTask> {
    let interval = interval?;
    debug!("[Session] Keepalive every {:?}", interval);
    Some(BackgroundTask::spawn("keepalive", move |mut stop| async move {
        // 第一次 tick 立即触发
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    if let Err(e) = transport.send_keepalive().await {
                        warn!("[Session] Keepalive failed: {}", e);
                        break;
                    }
                }
            }
        }
    }))
}

// ======================== 终端尺寸 ========================

/// 记录上次尺寸，只有变化时才返回新值
#[derive(Clone, Copy, Debug)]
pub struct SizeTracker {
    last: (u16, u16),
}

impl SizeTracker {
    pub fn new(initial: (u16, u16)) -> Self {
        Self { last: initial }
    }

    pub fn observe(&mut self, size: (u16, u16)) -> Option<(u16, u16)> {
        if size == self.last {
            None
        } else {
            self.last = size;
            Some(size)
        }
    }
}

/// 尺寸变化事件源：unix 上用 SIGWINCH，否则定时轮询
struct ResizeEvents {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
    poll: tokio::time::Interval,
}

impl ResizeEvents {
    fn new() -> Self {
        #[cfg(unix)]
        let signal = {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::window_change()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("[Session] SIGWINCH unavailable, polling instead: {}", e);
                    None
                }
            }
        };
        Self {
            #[cfg(unix)]
            signal,
            poll: tokio::time::interval(RESIZE_POLL_INTERVAL),
        }
    }

    async fn next(&mut self) {
        #[cfg(unix)]
        {
            if let Some(signal) = self.signal.as_mut() {
                if signal.recv().await.is_some() {
                    return;
                }
                self.signal = None;
            }
        }
        self.poll.tick().await;
    }
}

/// 监听终端尺寸变化，变化后的尺寸发送到 tx
pub fn spawn_resize_watcher(
    initial: (u16, u16),
    tx: mpsc::UnboundedSender<(u16, u16)>,
) -> BackgroundTask {
    BackgroundTask::spawn("resize", move |mut stop| async move {
        let mut tracker = SizeTracker::new(initial);
        let mut events = ResizeEvents::new();
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = events.next() => {
                    if let Some(size) = tracker.observe(terminal_size()) {
                        debug!("[Session] Terminal resized to {}x{}", size.0, size.1);
                        if tx.send(size).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    })
}

// ======================== 日志 tee ========================

/// 按模板生成日志文件名
///
/// 依次替换 %g 分组名、%n 主机名、%dt 日期时间、%d 日期、%u 用户、%a 别名
pub fn format_log_filename(template: &str, host: &HostRecord, now: DateTime<Local>) -> String {
    template
        .replace("%g", host.group_name())
        .replace("%n", &host.name)
        .replace("%dt", &now.format("%Y%m%d%H%M%S").to_string())
        .replace("%d", &now.format("%Y%m%d").to_string())
        .replace("%u", &host.user)
        .replace("%a", &host.alias)
}

/// 打开日志文件：cover 截断，append 追加；自动创建父目录
pub async fn open_log_file(path: &Path, mode: LogMode) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        LogMode::Cover => options.write(true).truncate(true),
        LogMode::Append => options.append(true),
    };
    options.open(path).await
}

/// 把 reader 的数据原样写到 primary 与 log，直到 EOF；日志写失败后只写 primary
pub async fn tee_stream<R, A, B>(mut reader: R, mut primary: A, mut log: Option<B>) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    A: AsyncWrite + Unpin,
    B: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; TEE_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        primary.write_all(&buf[..n]).await?;
        primary.flush().await?;
        let failed = match log.as_mut() {
            Some(file) => file.write_all(&buf[..n]).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            warn!("[Session] Log write failed, continuing without log: {}", e);
            log = None;
        }
        total += n as u64;
    }
    if let Some(mut file) = log {
        file.flush().await?;
    }
    Ok(total)
}

/// 启动日志 tee：读取会话输出管道，写到终端和日志文件，管道关闭后退出
pub fn spawn_log_tee<R>(reader: R, path: PathBuf, mode: LogMode) -> BackgroundTask
where
    R: AsyncRead + Unpin + Send + 'static,
{
    BackgroundTask::spawn("log-tee", move |_stop| async move {
        let file = match open_log_file(&path, mode).await {
            Ok(file) => {
                debug!("[Session] Logging output to {}", path.display());
                Some(file)
            }
            Err(e) => {
                warn!("[Session] Failed to open log file {}: {}", path.display(), e);
                None
            }
        };
        match tee_stream(reader, tokio::io::stdout(), file).await {
            Ok(total) => debug!("[Session] Log tee finished, {} bytes", total),
            Err(e) => warn!("[Session] Log tee stopped: {}", e),
        }
    })
}
