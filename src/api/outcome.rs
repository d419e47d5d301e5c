use crate::core::error::PipelineError;
use serde::Serialize;

/// 调用方可见的任务结果：成功标志 + 结果或原因
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome<T> {
    pub success: bool,
    pub interrupted: bool,
    pub result: Option<T>,
    pub reason: Option<String>,
}

impl<T> TaskOutcome<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            interrupted: false,
            result: Some(result),
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            interrupted: false,
            result: None,
            reason: Some(reason.into()),
        }
    }

    /// 中断不算失败，已完成的部分结果可以随之返回
    pub fn interrupted(partial: Option<T>) -> Self {
        Self {
            success: false,
            interrupted: true,
            result: partial,
            reason: Some("用户中断。".to_string()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(self.reason.unwrap_or_else(|| "unknown failure".to_string())),
        }
    }
}

impl<T> From<Result<T, PipelineError>> for TaskOutcome<T> {
    fn from(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => TaskOutcome::ok(value),
            Err(e) if e.is_interruption() => TaskOutcome::interrupted(None),
            Err(e) => TaskOutcome::failed(e.to_string()),
        }
    }
}
