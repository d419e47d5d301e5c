//! 任务配置 - 默认值与校验

use crate::core::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 1 mm 对应的 point 数 (1pt = 1/72 inch)
pub const MM: f32 = 72.0 / 25.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum LayoutOrder {
    /// 行优先（左右优先）
    #[default]
    Grid,
    /// 列优先（上下优先）
    Column,
}

impl LayoutOrder {
    /// 解析布局名称，未知值回退到 grid
    pub fn parse_lenient(value: &str) -> (Self, bool) {
        match value.trim().to_ascii_lowercase().as_str() {
            "grid" => (LayoutOrder::Grid, true),
            "column" => (LayoutOrder::Column, true),
            _ => (LayoutOrder::Grid, false),
        }
    }
}

impl From<String> for LayoutOrder {
    fn from(value: String) -> Self {
        let (order, known) = LayoutOrder::parse_lenient(&value);
        if !known {
            log::warn!("⚠️ 未知布局 '{}', 使用 grid。", value);
        }
        order
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityPolicy {
    /// 尾部/头部行集合有交集即视为重叠
    #[default]
    Exact,
    /// 拼接文本的 LCS 相似度 >= 阈值
    Fuzzy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityPolicy {
    /// 有重叠 => 保留，无重叠 => 跳过
    #[default]
    KeepOnOverlap,
    /// 无重叠 => 保留（新内容）；有重叠但文本变化 => 保留
    KeepOnNewContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub policy: SimilarityPolicy,
    pub fuzzy_threshold: f32,
    pub tail_window: usize,
    pub head_window: usize,
    pub continuity: ContinuityPolicy,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            policy: SimilarityPolicy::Exact,
            fuzzy_threshold: 0.3,
            tail_window: 2,
            head_window: 2,
            continuity: ContinuityPolicy::KeepOnOverlap,
        }
    }
}

impl SimilarityConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(PipelineError::Config(format!(
                "fuzzy_threshold must be within [0, 1], got {}",
                self.fuzzy_threshold
            )));
        }
        if self.tail_window == 0 || self.head_window == 0 {
            return Err(PipelineError::Config(
                "tail_window and head_window must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// OCR 分析区域 (x, y, width, height)，原始帧像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AnalysisRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 区域非空且完全落在图像内
    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= image_width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= image_height)
    }

    /// 解析 "x,y,w,h"
    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        let parts: Vec<u32> = value
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|e| PipelineError::Config(format!("invalid rect {:?}: {}", value, e)))?;
        match parts.as_slice() {
            [x, y, w, h] => Ok(Self::new(*x, *y, *w, *h)),
            _ => Err(PipelineError::Config(format!(
                "rect must be x,y,width,height, got {:?}",
                value
            ))),
        }
    }
}

/// 页面几何 (point)，默认 A4 纵向
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub page_width: f32,
    pub page_height: f32,
    pub margin_top: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub margin_right: f32,
    pub cell_padding: f32,
    pub min_cell_size: f32,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            page_width: 210.0 * MM,
            page_height: 297.0 * MM,
            margin_top: 20.0 * MM,
            margin_bottom: 20.0 * MM,
            margin_left: 15.0 * MM,
            margin_right: 15.0 * MM,
            cell_padding: 1.5 * MM,
            min_cell_size: 1.0 * MM,
        }
    }
}

impl PageSettings {
    pub fn content_width(&self) -> f32 {
        self.page_width - self.margin_left - self.margin_right
    }

    pub fn content_height(&self) -> f32 {
        self.page_height - self.margin_top - self.margin_bottom
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.content_width() <= 0.0 || self.content_height() <= 0.0 {
            return Err(PipelineError::Config(
                "page margins leave no content area".into(),
            ));
        }
        if self.cell_padding < 0.0 || self.min_cell_size <= 0.0 {
            return Err(PipelineError::Config(
                "cell padding must be >= 0 and cell floor > 0".into(),
            ));
        }
        Ok(())
    }
}

/// 视频处理设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub frame_interval_seconds: f32,
    pub exclusion_list: Vec<String>,
    pub ocr_analysis_rect: Option<AnalysisRect>,
    pub pdf_rows: u32,
    pub pdf_cols: u32,
    pub pdf_title: String,
    pub pdf_layout: LayoutOrder,
    pub image_order: Option<Vec<String>>,
    pub similarity: SimilarityConfig,
    pub page: PageSettings,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            frame_interval_seconds: 1.0,
            exclusion_list: Vec::new(),
            ocr_analysis_rect: None,
            pdf_rows: 3,
            pdf_cols: 2,
            pdf_title: "聊天记录证据".to_string(),
            pdf_layout: LayoutOrder::Grid,
            image_order: None,
            similarity: SimilarityConfig::default(),
            page: PageSettings::default(),
        }
    }
}

impl VideoSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.frame_interval_seconds > 0.0) {
            return Err(PipelineError::Config(format!(
                "frame_interval_seconds must be > 0, got {}",
                self.frame_interval_seconds
            )));
        }
        validate_grid(self.pdf_rows, self.pdf_cols)?;
        self.similarity.validate()?;
        self.page.validate()
    }
}

/// 长截图处理设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongImageSettings {
    pub slice_height: u32,
    pub overlap: u32,
    pub pdf_rows: u32,
    pub pdf_cols: u32,
    pub pdf_title: String,
    pub pdf_layout: LayoutOrder,
    pub image_order: Option<Vec<String>>,
    pub page: PageSettings,
}

impl Default for LongImageSettings {
    fn default() -> Self {
        Self {
            slice_height: 1000,
            overlap: 100,
            pdf_rows: 3,
            pdf_cols: 1,
            pdf_title: "长截图证据".to_string(),
            pdf_layout: LayoutOrder::Column,
            image_order: None,
            page: PageSettings::default(),
        }
    }
}

impl LongImageSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_slicing(self.slice_height, self.overlap)?;
        validate_grid(self.pdf_rows, self.pdf_cols)?;
        self.page.validate()
    }
}

pub fn validate_slicing(slice_height: u32, overlap: u32) -> Result<(), PipelineError> {
    if slice_height == 0 {
        return Err(PipelineError::Config("slice_height must be > 0".into()));
    }
    if overlap >= slice_height {
        return Err(PipelineError::Config(format!(
            "overlap ({}) must be smaller than slice_height ({})",
            overlap, slice_height
        )));
    }
    Ok(())
}

/// 单页单元格上限
pub const MAX_GRID_CELLS: u32 = 1024;

pub fn validate_grid(rows: u32, cols: u32) -> Result<(), PipelineError> {
    if rows == 0 || cols == 0 {
        return Err(PipelineError::Config(format!(
            "grid must be at least 1x1, got {}x{}",
            rows, cols
        )));
    }
    match rows.checked_mul(cols) {
        Some(cells) if cells <= MAX_GRID_CELLS => Ok(()),
        _ => Err(PipelineError::Config(format!(
            "grid {}x{} exceeds {} cells per page",
            rows, cols, MAX_GRID_CELLS
        ))),
    }
}

/// 从 JSON5（兼容 JSON）文件读取设置，缺省字段使用默认值
pub fn load_settings<T>(path: &Path) -> Result<T, PipelineError>
where
    T: for<'de> Deserialize<'de>,
{
    let raw = fs::read_to_string(path).map_err(|e| PipelineError::resource(path, e))?;
    parse_settings(&raw)
}

pub fn parse_settings<T>(raw: &str) -> Result<T, PipelineError>
where
    T: for<'de> Deserialize<'de>,
{
    json5::from_str(raw).map_err(|e| PipelineError::Config(format!("invalid settings: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(VideoSettings::default().validate().is_ok());
        assert!(LongImageSettings::default().validate().is_ok());
    }

    #[test]
    fn test_a4_content_area() {
        let page = PageSettings::default();
        assert!((page.content_width() - 510.24).abs() < 0.1);
        assert!((page.content_height() - 728.50).abs() < 0.1);
    }

    #[test]
    fn test_overlap_must_be_below_slice_height() {
        let err = validate_slicing(100, 100).unwrap_err();
        assert!(err.is_config());
        assert!(validate_slicing(0, 0).is_err());
        assert!(validate_slicing(100, 0).is_ok());
    }

    #[test]
    fn test_parse_json5_with_partial_fields() {
        let settings: LongImageSettings = parse_settings(
            r#"{
                // 只覆盖部分字段
                slice_height: 800,
                pdf_layout: 'grid',
            }"#,
        )
        .unwrap();
        assert_eq!(settings.slice_height, 800);
        assert_eq!(settings.overlap, 100);
        assert_eq!(settings.pdf_layout, LayoutOrder::Grid);
    }

    #[test]
    fn test_parse_video_settings_with_rect_and_policy() {
        let settings: VideoSettings = parse_settings(
            r#"{
                "exclusion_list": ["微信", "  "],
                "ocr_analysis_rect": {"x": 0, "y": 100, "width": 720, "height": 1000},
                "similarity": {"policy": "fuzzy", "fuzzy_threshold": 0.5}
            }"#,
        )
        .unwrap();
        assert_eq!(
            settings.ocr_analysis_rect,
            Some(AnalysisRect::new(0, 100, 720, 1000))
        );
        assert_eq!(settings.similarity.policy, SimilarityPolicy::Fuzzy);
        assert_eq!(settings.similarity.tail_window, 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rect_bounds() {
        let rect = AnalysisRect::new(10, 10, 50, 50);
        assert!(rect.fits_within(60, 60));
        assert!(!rect.fits_within(59, 60));
        assert!(!AnalysisRect::new(0, 0, 0, 10).fits_within(100, 100));
        assert!(!AnalysisRect::new(u32::MAX, 0, 1, 1).fits_within(100, 100));
    }

    #[test]
    fn test_rect_parse() {
        assert_eq!(
            AnalysisRect::parse("1, 2,3,4").unwrap(),
            AnalysisRect::new(1, 2, 3, 4)
        );
        assert!(AnalysisRect::parse("1,2,3").is_err());
        assert!(AnalysisRect::parse("a,b,c,d").is_err());
    }

    #[test]
    fn test_lenient_layout_parse() {
        assert_eq!(LayoutOrder::parse_lenient("Column"), (LayoutOrder::Column, true));
        assert_eq!(LayoutOrder::parse_lenient("spiral"), (LayoutOrder::Grid, false));

        let settings: LongImageSettings = parse_settings("{pdf_layout: 'spiral'}").unwrap();
        assert_eq!(settings.pdf_layout, LayoutOrder::Grid);
    }

    #[test]
    fn test_oversized_grid_rejected() {
        assert!(validate_grid(65536, 65536).unwrap_err().is_config());
        assert!(validate_grid(u32::MAX, 2).unwrap_err().is_config());
        assert!(validate_grid(33, 32).unwrap_err().is_config());
        assert!(validate_grid(32, 32).is_ok());

        let settings = VideoSettings {
            pdf_rows: 65536,
            pdf_cols: 65536,
            ..Default::default()
        };
        assert!(settings.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let settings = VideoSettings {
            frame_interval_seconds: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().unwrap_err().is_config());
    }
}
