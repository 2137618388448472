// 会话通道：PTY / shell 请求与数据收发

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use super::error::SshError;
use crate::constants::TTY_SPEED;

/// 会话层关心的远端事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// 标准输出
    Data(Vec<u8>),
    /// 标准错误
    Stderr(Vec<u8>),
    ExitStatus(u32),
    Eof,
    Close,
    Other,
}

/// 交互 shell 所需的通道操作
#[async_trait]
pub trait ShellChannel: Send {
    /// 申请伪终端（开启回显）
    async fn open_pty(&mut self, term: &str, cols: u32, rows: u32) -> Result<(), SshError>;

    async fn start_shell(&mut self) -> Result<(), SshError>;

    /// 下一个远端事件，通道结束后返回 None
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn send(&mut self, bytes: &[u8]) -> Result<(), SshError>;

    async fn send_eof(&mut self) -> Result<(), SshError>;

    async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), SshError>;

    async fn shutdown(&mut self) -> Result<(), SshError>;
}

#[async_trait]
impl ShellChannel for Channel<Msg> {
    async fn open_pty(&mut self, term: &str, cols: u32, rows: u32) -> Result<(), SshError> {
        self.request_pty(
            false,
            term,
            cols,
            rows,
            0,
            0,
            &[
                (russh::Pty::ECHO, 1),
                (russh::Pty::TTY_OP_ISPEED, TTY_SPEED),
                (russh::Pty::TTY_OP_OSPEED, TTY_SPEED),
            ],
        )
        .await
        .map_err(|e| SshError::Channel(format!("request pty: {}", e)))
    }

    async fn start_shell(&mut self) -> Result<(), SshError> {
        self.request_shell(false)
            .await
            .map_err(|e| SshError::Channel(format!("request shell: {}", e)))
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        let event = match self.wait().await? {
            ChannelMsg::Data { data } => ChannelEvent::Data(data.to_vec()),
            ChannelMsg::ExtendedData { data, .. } => ChannelEvent::Stderr(data.to_vec()),
            ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
            ChannelMsg::Eof => ChannelEvent::Eof,
            ChannelMsg::Close => ChannelEvent::Close,
            _ => ChannelEvent::Other,
        };
        Some(event)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), SshError> {
        self.data(bytes)
            .await
            .map_err(|e| SshError::Channel(format!("send data: {}", e)))
    }

    async fn send_eof(&mut self) -> Result<(), SshError> {
        self.eof()
            .await
            .map_err(|e| SshError::Channel(format!("send eof: {}", e)))
    }

    async fn resize(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| SshError::Channel(format!("window change: {}", e)))
    }

    async fn shutdown(&mut self) -> Result<(), SshError> {
        self.close()
            .await
            .map_err(|e| SshError::Channel(format!("close: {}", e)))
    }
}
