// SSH 会话阶段定义

use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing::debug;

/// 会话阶段（只能前进，任意阶段都可以直接进入 Closed）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStage {
    /// 已创建，尚未拨号
    Idle = 0,
    /// TCP / 代理拨号
    Dialing = 1,
    /// SSH 握手（密钥交换）
    Handshaking = 2,
    /// 身份认证
    Authenticating = 3,
    /// 会话通道已打开
    SessionOpen = 4,
    /// 已申请伪终端
    PtyRequested = 5,
    /// 远程 shell 运行中
    ShellRunning = 6,
    /// 会话结束
    Closed = 7,
}

impl SessionStage {
    /// 获取阶段名称（英文）
    pub fn label_en(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Dialing => "Dialing",
            Self::Handshaking => "SSH handshake",
            Self::Authenticating => "Authenticating",
            Self::SessionOpen => "Session open",
            Self::PtyRequested => "PTY requested",
            Self::ShellRunning => "Shell running",
            Self::Closed => "Closed",
        }
    }

    pub fn can_advance_to(&self, next: SessionStage) -> bool {
        next == Self::Closed || next > *self
    }
}

/// 失败记录
#[derive(Clone, Debug)]
pub struct StageFailure {
    pub stage: SessionStage,
    pub message: String,
    pub at: DateTime<Local>,
}

#[derive(Debug)]
struct TrackerState {
    stage: SessionStage,
    failure: Option<StageFailure>,
}

/// 单次会话的阶段跟踪器，连接器与会话控制器共享
#[derive(Debug)]
pub struct StageTracker {
    session_id: String,
    state: Mutex<TrackerState>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(TrackerState {
                stage: SessionStage::Idle,
                failure: None,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stage(&self) -> SessionStage {
        self.lock().stage
    }

    /// 推进阶段，非法回退返回 false 且状态不变
    pub fn advance(&self, next: SessionStage) -> bool {
        let mut state = self.lock();
        if !state.stage.can_advance_to(next) {
            debug!(
                "[Session] {} ignored transition {} -> {}",
                self.session_id,
                state.stage.label_en(),
                next.label_en()
            );
            return false;
        }
        debug!(
            "[Session] {} {} -> {}",
            self.session_id,
            state.stage.label_en(),
            next.label_en()
        );
        state.stage = next;
        true
    }

    /// 记录当前阶段的失败（只保留第一次）
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if state.failure.is_none() {
            state.failure = Some(StageFailure {
                stage: state.stage,
                message: message.into(),
                at: Local::now(),
            });
        }
    }

    pub fn failure(&self) -> Option<StageFailure> {
        self.lock().failure.clone()
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}
