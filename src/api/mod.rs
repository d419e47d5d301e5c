//! 调用方接口：视频证据任务、长截图任务，以及两者共用的排序/命名规则

pub mod long_image;
pub mod outcome;
pub mod video;

use crate::core::progress::ProgressReporter;
use chrono::{DateTime, TimeZone};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use long_image::{LongImageJob, LongImageReport};
pub use outcome::TaskOutcome;
pub use video::{extract_reference_frame, VideoEvidenceJob, VideoEvidenceReport};

const MAX_NAME_CHARS: usize = 50;

/// 渲染产物
#[derive(Debug, Clone, serde::Serialize)]
pub struct RenderedDocument {
    pub name: String,
    pub pages: usize,
    pub files: Vec<PathBuf>,
}

/// 按文件名列表重排图片
///
/// 列表中不存在的名字被忽略；一个都匹配不上时回退默认顺序。
pub fn apply_image_order(
    images: &[PathBuf],
    order: Option<&[String]>,
    reporter: &ProgressReporter,
) -> Vec<PathBuf> {
    let Some(order) = order.filter(|o| !o.is_empty()) else {
        return images.to_vec();
    };

    let by_name: HashMap<String, &PathBuf> = images
        .iter()
        .filter_map(|p| Some((p.file_name()?.to_string_lossy().into_owned(), p)))
        .collect();

    let ordered: Vec<PathBuf> = order
        .iter()
        .filter_map(|name| by_name.get(name.as_str()).map(|p| (*p).clone()))
        .collect();

    if ordered.is_empty() {
        reporter.warn("警告: 提供的排序列表无效或与图片不匹配，使用默认顺序。");
        return images.to_vec();
    }
    reporter.info(format!("应用自定义排序: {} 张图片", ordered.len()));
    ordered
}

/// 标题 -> 文件名主干：保留字母数字、空格和 `-`，空格变 `_`，截断到 50 字符
pub fn sanitize_title(title: &str, fallback: &str) -> String {
    let name: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' || c == '-' { c } else { '_' })
        .map(|c| if c == ' ' { '_' } else { c })
        .take(MAX_NAME_CHARS)
        .collect();
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

/// `<title>_<kind>_<YYYYmmddHHMMSS>`
pub fn document_name<Tz: TimeZone>(title: &str, fallback: &str, kind: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}_{}",
        sanitize_title(title, fallback),
        kind,
        at.format("%Y%m%d%H%M%S")
    )
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
