//! 进度/日志通道与停止信号
//!
//! 工作线程通过有界队列把 `ProgressEvent` 交给调用方，调用方在自己的线程上消费，
//! 不直接跨线程回调。

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_MAX_PROGRESS_UPDATES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RefFrameExtraction,
    ExtractingFrames,
    OcrProcessing,
    Slicing,
    Layout,
    Rendering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        stage: Stage,
        completed: usize,
        total: usize,
    },
    Log {
        stage: Stage,
        level: LogLevel,
        message: String,
    },
}

impl ProgressEvent {
    /// 进度百分比 (0-100)，日志事件返回 None
    pub fn percent(&self) -> Option<u8> {
        match self {
            ProgressEvent::Progress {
                completed, total, ..
            } if *total > 0 => Some(((*completed).min(*total) * 100 / *total) as u8),
            ProgressEvent::Progress { .. } => Some(100),
            ProgressEvent::Log { .. } => None,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ProgressEvent::Progress { stage, .. } | ProgressEvent::Log { stage, .. } => *stage,
        }
    }
}

/// 创建有界进度通道
pub fn channel(capacity: usize) -> (ProgressReporter, Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (
        ProgressReporter {
            sender: Some(tx),
            stage: Stage::Layout,
            max_updates: DEFAULT_MAX_PROGRESS_UPDATES,
            updates_sent: Arc::new(AtomicUsize::new(0)),
        },
        rx,
    )
}

/// 进度上报器
///
/// 每条日志同时写入 `log`；队列满时丢弃事件而不是阻塞工作线程。
/// 进度按阶段节流，最多约 `max_updates` 条，`completed == total` 总会发送。
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Option<SyncSender<ProgressEvent>>,
    stage: Stage,
    max_updates: usize,
    updates_sent: Arc<AtomicUsize>,
}

impl ProgressReporter {
    /// 不连接任何接收方，只写 `log`
    pub fn silent() -> Self {
        Self {
            sender: None,
            stage: Stage::Layout,
            max_updates: DEFAULT_MAX_PROGRESS_UPDATES,
            updates_sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 切换到新阶段，节流计数重新开始
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self {
            sender: self.sender.clone(),
            stage,
            max_updates: self.max_updates,
            updates_sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn progress(&self, completed: usize, total: usize) {
        let sent = self.updates_sent.fetch_add(1, Ordering::Relaxed) + 1;
        if total == 0 {
            return;
        }
        let frequency = if self.max_updates > 0 && total >= self.max_updates {
            (total / self.max_updates).max(1)
        } else {
            1
        };
        if completed == total || sent % frequency == 0 {
            self.emit(ProgressEvent::Progress {
                stage: self.stage,
                completed,
                total,
            });
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => debug!("[{:?}] {}", self.stage, message),
            LogLevel::Info => info!("[{:?}] {}", self.stage, message),
            LogLevel::Warn => warn!("[{:?}] {}", self.stage, message),
            LogLevel::Error => error!("[{:?}] {}", self.stage, message),
        }
        self.emit(ProgressEvent::Log {
            stage: self.stage,
            level,
            message,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!("progress queue full, dropping {:?}", dropped.stage());
            }
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::silent()
    }
}

/// 协作式停止信号，每个外层迭代检查一次
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
