// SSH 交互会话控制
// 从连接池取连接，打开 PTY + shell，转发输入输出直到远端关闭

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, DuplexStream, Stdout};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::channel::{ChannelEvent, ShellChannel};
use super::client::RusshConnector;
use super::config::{keepalive_interval, DialTarget};
use super::error::SshError;
use super::event::{SessionStage, StageTracker};
use super::pool::ConnectionPool;
use super::tasks::{format_log_filename, spawn_keepalive, spawn_log_tee, BackgroundTask};
use super::terminal::{Console, LocalTerminal, StdinPump};
use crate::constants::TEE_CHUNK_SIZE;
use crate::models::{Group, HostRecord};
use crate::services::storage::expand_path;

/// 会话结束信息
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub session_id: String,
    pub exit_status: Option<u32>,
    pub elapsed: Duration,
}

/// 远端输出去向：直接写终端，或写入 tee 管道
enum OutputSink {
    Terminal(Stdout),
    Tee(DuplexStream),
}

impl OutputSink {
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            OutputSink::Terminal(out) => {
                out.write_all(data).await?;
                out.flush().await
            }
            OutputSink::Tee(pipe) => pipe.write_all(data).await,
        }
    }
}

/// 会话控制器
pub struct SessionController {
    pool: Arc<ConnectionPool<RusshConnector>>,
}

impl SessionController {
    pub fn new(pool: Arc<ConnectionPool<RusshConnector>>) -> Self {
        Self { pool }
    }

    /// 运行一次交互会话，返回时所有后台任务均已停止
    pub async fn run(
        &self,
        host: &HostRecord,
        group: Option<&Group>,
        stdin: &mut StdinPump,
    ) -> Result<SessionSummary, SshError> {
        let stages = StageTracker::new();
        let started = Instant::now();
        info!(
            "[Session] {} connecting to {} ({})",
            stages.session_id(),
            host.name,
            host.connection_key()
        );

        let result = self.drive(host, group, stdin, &stages).await;
        if let Err(e) = &result {
            stages.fail(e.to_string());
        }
        let last_stage = stages.stage();
        stages.advance(SessionStage::Closed);
        if let Some(failure) = stages.failure() {
            warn!(
                "[Session] {} failed during '{}' at {}: {}",
                stages.session_id(),
                failure.stage.label_en(),
                failure.at.format("%H:%M:%S"),
                failure.message
            );
        } else {
            debug!(
                "[Session] {} ended after '{}'",
                stages.session_id(),
                last_stage.label_en()
            );
        }

        let exit_status = result?;
        info!(
            "[Session] {} closed after {:?}",
            stages.session_id(),
            started.elapsed()
        );
        Ok(SessionSummary {
            session_id: stages.session_id().to_string(),
            exit_status,
            elapsed: started.elapsed(),
        })
    }

    async fn drive(
        &self,
        host: &HostRecord,
        group: Option<&Group>,
        stdin: &mut StdinPump,
        stages: &StageTracker,
    ) -> Result<Option<u32>, SshError> {
        let target = DialTarget::new(host, group.and_then(|g| g.proxy.as_ref()))?;
        let transport = self.pool.acquire(&target, stages).await?;

        let mut channel = transport.open_session().await?;
        stages.advance(SessionStage::SessionOpen);

        let keepalive = spawn_keepalive(transport.clone(), keepalive_interval(&host.options));
        let result = interact(&mut channel, &Console, host, stdin, stages).await;

        if let Some(task) = keepalive {
            task.stop().await;
        }
        if let Err(e) = channel.shutdown().await {
            debug!("[Session] {}", e);
        }
        result
    }
}

/// PTY + shell + 输入输出转发
///
/// 任何返回路径上 raw 模式都会恢复，resize 与 tee 任务都已停止。
async fn interact<C, T>(
    channel: &mut C,
    console: &T,
    host: &HostRecord,
    stdin: &mut StdinPump,
    stages: &StageTracker,
) -> Result<Option<u32>, SshError>
where
    C: ShellChannel,
    T: LocalTerminal,
{
    let (cols, rows) = console.size();
    let _raw = console.enter_raw()?;

    channel
        .open_pty(&console.term_type(), cols as u32, rows as u32)
        .await?;
    stages.advance(SessionStage::PtyRequested);

    let (resize_tx, mut resize_rx) = mpsc::unbounded_channel();
    let resize = console.watch_resize((cols, rows), resize_tx);
    let (mut sink, tee) = output_sink(host);

    let outcome = match channel.start_shell().await {
        Ok(()) => {
            stages.advance(SessionStage::ShellRunning);
            pump(channel, &mut sink, stdin, &mut resize_rx).await
        }
        Err(e) => Err(e),
    };

    // 关闭写端后 tee 读到 EOF，输出全部落盘后才返回
    drop(sink);
    let mut tasks: Vec<BackgroundTask> = Vec::with_capacity(2);
    tasks.extend(tee);
    tasks.push(resize);
    for task in tasks {
        task.stop().await;
    }
    outcome
}

/// 根据主机日志配置决定输出去向
fn output_sink(host: &HostRecord) -> (OutputSink, Option<BackgroundTask>) {
    if !host.log.enable || host.log.filename.trim().is_empty() {
        return (OutputSink::Terminal(tokio::io::stdout()), None);
    }
    let filename = format_log_filename(&host.log.filename, host, chrono::Local::now());
    let path = expand_path(&filename);
    let (writer, reader) = tokio::io::duplex(TEE_CHUNK_SIZE * 4);
    let tee = spawn_log_tee(reader, path, host.log.mode());
    (OutputSink::Tee(writer), Some(tee))
}

/// 主循环：远端输出 -> 本地，本地输入 -> 远端，尺寸变化 -> window_change
async fn pump<C: ShellChannel>(
    channel: &mut C,
    sink: &mut OutputSink,
    stdin: &mut StdinPump,
    resize_rx: &mut mpsc::UnboundedReceiver<(u16, u16)>,
) -> Result<Option<u32>, SshError> {
    let mut stderr = tokio::io::stderr();
    let mut exit_status = None;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = channel.next_event() => match event {
                Some(ChannelEvent::Data(data)) => sink.write(&data).await?,
                Some(ChannelEvent::Stderr(data)) => {
                    stderr.write_all(&data).await?;
                    stderr.flush().await?;
                }
                Some(ChannelEvent::ExitStatus(code)) => {
                    debug!("[Session] Remote exit status {}", code);
                    exit_status = Some(code);
                }
                Some(ChannelEvent::Eof) => debug!("[Session] Remote EOF"),
                Some(ChannelEvent::Close) | None => break,
                Some(ChannelEvent::Other) => {}
            },
            chunk = stdin.recv_chunk(), if stdin_open => match chunk {
                Some(bytes) => channel.send(&bytes).await?,
                None => {
                    debug!("[Session] Local stdin closed, sending EOF");
                    stdin_open = false;
                    if let Err(e) = channel.send_eof().await {
                        debug!("[Session] {}", e);
                    }
                }
            },
            Some((cols, rows)) = resize_rx.recv() => {
                if let Err(e) = channel.resize(cols as u32, rows as u32).await {
                    debug!("[Session] {}", e);
                }
            }
        }
    }
    Ok(exit_status)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::models::catalog::SessionLog;
    use crate::ssh::channel::testing::{Call, MockChannel};

    /// 记录 raw 模式与 resize 任务状态的假终端
    struct FakeConsole {
        raw: Arc<AtomicBool>,
        resize_stopped: Arc<AtomicBool>,
        sizes: Mutex<Option<mpsc::UnboundedReceiver<(u16, u16)>>>,
    }

    struct FakeRaw(Arc<AtomicBool>);

    impl Drop for FakeRaw {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    impl FakeConsole {
        fn new() -> (Self, mpsc::UnboundedSender<(u16, u16)>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let console = Self {
                raw: Arc::new(AtomicBool::new(false)),
                resize_stopped: Arc::new(AtomicBool::new(false)),
                sizes: Mutex::new(Some(rx)),
            };
            (console, tx)
        }
    }

    impl LocalTerminal for FakeConsole {
        type Guard = FakeRaw;

        fn enter_raw(&self) -> io::Result<FakeRaw> {
            self.raw.store(true, Ordering::SeqCst);
            Ok(FakeRaw(self.raw.clone()))
        }

        fn size(&self) -> (u16, u16) {
            (100, 30)
        }

        fn term_type(&self) -> String {
            "xterm-test".into()
        }

        fn watch_resize(
            &self,
            _initial: (u16, u16),
            tx: mpsc::UnboundedSender<(u16, u16)>,
        ) -> BackgroundTask {
            let sizes = self.sizes.lock().expect("sizes").take();
            let stopped = self.resize_stopped.clone();
            BackgroundTask::spawn("resize", move |mut stop| async move {
                if let Some(mut sizes) = sizes {
                    loop {
                        tokio::select! {
                            _ = &mut stop => break,
                            Some(size) = sizes.recv() => {
                                if tx.send(size).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                } else {
                    let _ = stop.await;
                }
                stopped.store(true, Ordering::SeqCst);
            })
        }
    }

    fn drain(calls: &mut mpsc::UnboundedReceiver<Call>) -> Vec<Call> {
        let mut seen = Vec::new();
        while let Ok(call) = calls.try_recv() {
            seen.push(call);
        }
        seen
    }

    #[tokio::test]
    async fn pty_failure_restores_terminal() {
        let (mut channel, _events, mut calls) = MockChannel::new();
        channel.fail_pty = true;
        let (console, _sizes) = FakeConsole::new();
        let (_stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let mut stdin = StdinPump::from_receiver(stdin_rx);
        let stages = StageTracker::new();

        let host = HostRecord::default();
        let result = interact(&mut channel, &console, &host, &mut stdin, &stages).await;

        assert!(matches!(result, Err(SshError::Channel(_))));
        assert!(!console.raw.load(Ordering::SeqCst));
        assert_ne!(stages.stage(), SessionStage::PtyRequested);
        assert_eq!(
            drain(&mut calls),
            vec![Call::Pty {
                term: "xterm-test".into(),
                cols: 100,
                rows: 30
            }]
        );
    }

    #[tokio::test]
    async fn shell_failure_stops_background_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = dir.path().join("%n.log");
        let host = host_with_log(true, &template.to_string_lossy());

        let (mut channel, _events, mut calls) = MockChannel::new();
        channel.fail_shell = true;
        let (console, _sizes) = FakeConsole::new();
        let (_stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let mut stdin = StdinPump::from_receiver(stdin_rx);
        let stages = StageTracker::new();

        let result = interact(&mut channel, &console, &host, &mut stdin, &stages).await;

        assert!(matches!(result, Err(SshError::Channel(_))));
        assert!(!console.raw.load(Ordering::SeqCst));
        assert!(console.resize_stopped.load(Ordering::SeqCst));
        assert_eq!(stages.stage(), SessionStage::PtyRequested);
        // tee 已结束并创建了日志文件
        assert!(dir.path().join("web1.log").exists());
        let seen = drain(&mut calls);
        assert_eq!(seen.last(), Some(&Call::Shell));
    }

    #[tokio::test]
    async fn session_forwards_input_resize_and_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = dir.path().join("%n.log");
        let host = host_with_log(true, &template.to_string_lossy());

        let (mut channel, events, mut calls) = MockChannel::new();
        let (console, sizes) = FakeConsole::new();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let mut stdin = StdinPump::from_receiver(stdin_rx);
        let stages = StageTracker::new();

        events.send(ChannelEvent::Data(b"hi\r\n".to_vec())).expect("event");
        stdin_tx.send(b"ls\n".to_vec()).expect("stdin");
        drop(stdin_tx);
        sizes.send((120, 40)).expect("size");

        // 收到 EOF 与 resize 后远端才退出
        let remote = async {
            let mut seen = Vec::new();
            while !(seen.contains(&Call::Eof) && seen.contains(&Call::Resize(120, 40))) {
                match calls.recv().await {
                    Some(call) => seen.push(call),
                    None => break,
                }
            }
            events.send(ChannelEvent::ExitStatus(3)).expect("event");
            events.send(ChannelEvent::Close).expect("event");
            seen
        };

        let (result, seen) = tokio::join!(
            interact(&mut channel, &console, &host, &mut stdin, &stages),
            remote
        );

        assert_eq!(result.expect("session"), Some(3));
        assert_eq!(stages.stage(), SessionStage::ShellRunning);
        assert!(!console.raw.load(Ordering::SeqCst));
        assert!(console.resize_stopped.load(Ordering::SeqCst));

        let data = seen.iter().position(|c| *c == Call::Data(b"ls\n".to_vec()));
        let eof = seen.iter().position(|c| *c == Call::Eof);
        assert!(data.is_some() && data < eof);
        let resizes: Vec<&Call> = seen.iter().filter(|c| matches!(c, Call::Resize(..))).collect();
        assert_eq!(resizes, vec![&Call::Resize(120, 40)]);
        assert_eq!(seen[1], Call::Shell);

        let content = std::fs::read_to_string(dir.path().join("web1.log")).expect("log");
        assert_eq!(content, "hi\r\n");
    }

    fn host_with_log(enable: bool, filename: &str) -> HostRecord {
        HostRecord {
            name: "web1".into(),
            user: "root".into(),
            log: SessionLog {
                enable,
                filename: filename.into(),
                mode: "append".into(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn disabled_log_writes_straight_to_terminal() {
        let (sink, tee) = output_sink(&host_with_log(false, "/tmp/x.log"));
        assert!(matches!(sink, OutputSink::Terminal(_)));
        assert!(tee.is_none());

        let (sink, tee) = output_sink(&host_with_log(true, "  "));
        assert!(matches!(sink, OutputSink::Terminal(_)));
        assert!(tee.is_none());
    }

    #[tokio::test]
    async fn enabled_log_tees_into_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = dir.path().join("%n-%u.log");
        let host = host_with_log(true, &template.to_string_lossy());

        let (mut sink, tee) = output_sink(&host);
        sink.write(b"hello\r\n").await.expect("write");
        sink.write(b"world\r\n").await.expect("write");
        drop(sink);
        tee.expect("tee task").stop().await;

        let content = std::fs::read_to_string(dir.path().join("web1-root.log")).expect("log");
        assert_eq!(content, "hello\r\nworld\r\n");
    }
}
