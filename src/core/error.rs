use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// 参数非法，在任何工作开始前拒绝
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// 源文件缺失/不可读，或输出目录不可写
    #[error("Resource unavailable {path:?}: {reason}")]
    Resource { path: PathBuf, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("OCR error: {0}")]
    Ocr(String),
    #[error("Frame extraction error: {0}")]
    FrameExtraction(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Interrupted by stop signal")]
    Interrupted,
}

impl PipelineError {
    pub fn resource(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Resource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_interruption(&self) -> bool {
        matches!(self, PipelineError::Interrupted)
    }

    pub fn is_config(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}
