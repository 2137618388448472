// 本地终端：raw 模式、尺寸、stdin 读取

use std::io::{self, Read};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::tasks::{spawn_resize_watcher, BackgroundTask};
use crate::constants::DEFAULT_TERM;
use crate::services::prompt::LineSource;

/// 会话使用的本地终端
pub trait LocalTerminal {
    /// raw 模式守卫，drop 时恢复
    type Guard;

    fn enter_raw(&self) -> io::Result<Self::Guard>;

    fn size(&self) -> (u16, u16);

    fn term_type(&self) -> String;

    /// 监听尺寸变化，变化后的尺寸发送到 tx
    fn watch_resize(
        &self,
        initial: (u16, u16),
        tx: mpsc::UnboundedSender<(u16, u16)>,
    ) -> BackgroundTask;
}

/// 进程所在的控制终端
#[derive(Clone, Copy, Debug, Default)]
pub struct Console;

impl LocalTerminal for Console {
    type Guard = RawModeGuard;

    fn enter_raw(&self) -> io::Result<RawModeGuard> {
        RawModeGuard::enable()
    }

    fn size(&self) -> (u16, u16) {
        terminal_size()
    }

    fn term_type(&self) -> String {
        term_type()
    }

    fn watch_resize(
        &self,
        initial: (u16, u16),
        tx: mpsc::UnboundedSender<(u16, u16)>,
    ) -> BackgroundTask {
        spawn_resize_watcher(initial, tx)
    }
}

/// 开启 raw 模式，离开作用域时恢复
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            warn!("[Terminal] Failed to restore terminal mode: {}", e);
        }
    }
}

/// 当前终端尺寸 (cols, rows)，获取失败时按 80x24
pub fn terminal_size() -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => (80, 24),
    }
}

/// 远程终端类型，取自 TERM
pub fn term_type() -> String {
    std::env::var("TERM")
        .ok()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TERM.to_string())
}

/// stdin 读取泵
///
/// 阻塞读取放在独立线程中，进程内只创建一次；菜单按行读取，会话按块读取，
/// 两者共用同一个接收端，会话结束后不会遗留读取任务。
pub struct StdinPump {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl StdinPump {
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("stdin-pump".to_string())
            .spawn(move || {
                let mut stdin = io::stdin();
                let mut buf = [0u8; 1024];
                loop {
                    match stdin.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            warn!("[Terminal] stdin read failed: {}", e);
                            break;
                        }
                    }
                }
                debug!("[Terminal] stdin closed");
            })?;
        Ok(Self::from_receiver(rx))
    }

    pub fn from_receiver(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
        }
    }

    /// 读取下一块原始输入，stdin 关闭后返回 None
    pub async fn recv_chunk(&mut self) -> Option<Vec<u8>> {
        if !self.pending.is_empty() {
            return Some(std::mem::take(&mut self.pending));
        }
        self.rx.recv().await
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[async_trait]
impl LineSource for StdinPump {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            match self.rx.recv().await {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None if self.pending.is_empty() => return Ok(None),
                None => {
                    let rest = std::mem::take(&mut self.pending);
                    return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
                }
            }
        }
    }
}
