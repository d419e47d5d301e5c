//! 文字识别能力接口
//!
//! 识别本身是外部协作方，这里只定义 "给一张图，返回有序文本行" 的契约，
//! 以及用于测试的脚本化实现。

pub mod registry;
pub mod tesseract;

use crate::core::error::PipelineError;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use registry::{global_provider, install_global_provider};
pub use tesseract::TesseractOcr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = (self.left + self.width).max(other.left + other.width);
        let bottom = (self.top + self.height).max(other.top + other.height);
        BoundingBox {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// 一行识别结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedLine {
    pub text: String,
    pub bbox: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

impl RecognizedLine {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bbox: None,
            confidence: None,
        }
    }
}

pub trait OcrProvider: Send + Sync {
    /// 识别图片中的文本行，按阅读顺序返回
    fn recognize(&self, image: &Path) -> Result<Vec<RecognizedLine>, PipelineError>;

    fn name(&self) -> &str {
        "ocr"
    }
}

enum Script {
    Lines(Vec<String>),
    Fail(String),
}

/// 脚本化 OCR：按文件名返回预设文本行或失败，记录每次调用的输入路径
pub struct ScriptedOcr {
    scripts: HashMap<String, Script>,
    fallback: Option<Box<dyn Fn(&Path) -> Vec<String> + Send + Sync>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 未脚本化的文件交给 `pattern` 处理
    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(&Path) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            fallback: Some(Box::new(pattern)),
            ..Self::new()
        }
    }

    pub fn lines(mut self, file_name: &str, lines: &[&str]) -> Self {
        self.scripts.insert(
            file_name.to_string(),
            Script::Lines(lines.iter().map(|l| l.to_string()).collect()),
        );
        self
    }

    pub fn fail(mut self, file_name: &str, reason: &str) -> Self {
        self.scripts
            .insert(file_name.to_string(), Script::Fail(reason.to_string()));
        self
    }

    /// 已识别过的输入路径（按调用顺序）
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn script_key(image: &Path) -> String {
        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // 裁剪后的临时文件以 cropped_ 前缀命名
        name.strip_prefix("cropped_").map(str::to_string).unwrap_or(name)
    }
}

impl Default for ScriptedOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrProvider for ScriptedOcr {
    fn recognize(&self, image: &Path) -> Result<Vec<RecognizedLine>, PipelineError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(image.to_path_buf());
        }

        let lines = match self.scripts.get(&Self::script_key(image)) {
            Some(Script::Lines(lines)) => lines.clone(),
            Some(Script::Fail(reason)) => return Err(PipelineError::Ocr(reason.clone())),
            None => self
                .fallback
                .as_ref()
                .map(|f| f(image))
                .unwrap_or_default(),
        };

        Ok(lines.into_iter().map(RecognizedLine::text_only).collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
