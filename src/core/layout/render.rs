//! 文档渲染
//!
//! 排版引擎只产出描述，具体输出交给 `DocumentRenderer`：
//! 单个 PDF、JSON 清单，或逐页合成 PNG。

use super::pdf::PdfRenderer;
use super::{DocumentLayout, PageLayout, PlacedImage};
use crate::core::error::PipelineError;
use crate::core::progress::{ProgressReporter, StopSignal};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub trait DocumentRenderer: Send + Sync {
    /// 渲染到 `output_base`（不含扩展名），返回写出的文件
    fn render(&self, document: &DocumentLayout, output_base: &Path) -> Result<Vec<PathBuf>, PipelineError>;

    fn name(&self) -> &str;
}

/// 渲染方选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    #[default]
    Pdf,
    Raster,
    Manifest,
}

impl RendererKind {
    pub fn build(self, reporter: ProgressReporter, stop: StopSignal) -> Box<dyn DocumentRenderer> {
        match self {
            RendererKind::Pdf => Box::new(
                PdfRenderer::new()
                    .with_reporter(reporter)
                    .with_stop_signal(stop),
            ),
            RendererKind::Raster => Box::new(
                RasterPageRenderer::new()
                    .with_reporter(reporter)
                    .with_stop_signal(stop),
            ),
            RendererKind::Manifest => Box::new(JsonManifestRenderer),
        }
    }
}

pub(super) fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub(super) fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::resource(parent, e))?;
    }
    Ok(())
}

/// 分页描述写成 `<base>.json`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonManifestRenderer;

impl DocumentRenderer for JsonManifestRenderer {
    fn render(&self, document: &DocumentLayout, output_base: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let path = with_suffix(output_base, ".json");
        ensure_parent(&path)?;

        let json = serde_json::to_string_pretty(document)?;
        if let Err(e) = fs::write(&path, json) {
            let _ = fs::remove_file(&path);
            return Err(PipelineError::resource(&path, e));
        }
        Ok(vec![path])
    }

    fn name(&self) -> &str {
        "manifest"
    }
}

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GRID_LINE: Rgba<u8> = Rgba([211, 211, 211, 255]);

/// 逐页合成 PNG：白底、浅灰网格、图片居中
///
/// 输出到 `<base>/page_001.png` ...
pub struct RasterPageRenderer {
    dpi: f32,
    threads: usize,
    reporter: ProgressReporter,
    stop: StopSignal,
}

impl RasterPageRenderer {
    pub fn new() -> Self {
        Self {
            dpi: 150.0,
            threads: num_cpus::get().min(4),
            reporter: ProgressReporter::silent(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_dpi(mut self, dpi: f32) -> Self {
        self.dpi = dpi.max(18.0);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    fn px(&self, points: f32) -> u32 {
        (points * self.dpi / 72.0).round().max(0.0) as u32
    }

    fn draw_page(&self, document: &DocumentLayout, page: &PageLayout) -> RgbaImage {
        let width = self.px(document.page.page_width).max(1);
        let height = self.px(document.page.page_height).max(1);
        let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);

        let cell_w = self.px(document.cell.cell_width);
        let cell_h = self.px(document.cell.cell_height);
        for cell in &page.cells {
            draw_rect_outline(&mut canvas, self.px(cell.x), self.px(cell.y), cell_w, cell_h);
        }

        // 图片解码与缩放并行，合成保持顺序
        let placed: Vec<&PlacedImage> = page.cells.iter().filter_map(|c| c.image.as_ref()).collect();
        let tiles: Vec<(i64, i64, Result<RgbaImage, PipelineError>)> = placed
            .par_iter()
            .map(|img| {
                let tile = self.load_tile(img);
                (self.px(img.x) as i64, self.px(img.y) as i64, tile)
            })
            .collect();

        for ((x, y, tile), img) in tiles.into_iter().zip(&placed) {
            match tile {
                Ok(tile) => imageops::overlay(&mut canvas, &tile, x, y),
                Err(e) => self
                    .reporter
                    .warn(format!("绘制图片失败 {}: {}", img.path.display(), e)),
            }
        }
        canvas
    }

    fn load_tile(&self, img: &PlacedImage) -> Result<RgbaImage, PipelineError> {
        let source = image::open(&img.path)?;
        let w = self.px(img.display_width).max(1);
        let h = self.px(img.display_height).max(1);
        Ok(source.resize_exact(w, h, FilterType::Triangle).to_rgba8())
    }
}

impl Default for RasterPageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRenderer for RasterPageRenderer {
    fn render(&self, document: &DocumentLayout, output_base: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        fs::create_dir_all(output_base).map_err(|e| PipelineError::resource(output_base, e))?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| PipelineError::Render(format!("failed to build render pool: {}", e)))?;

        let total = document.page_count();
        let mut written = Vec::with_capacity(total);

        for page in document.pages() {
            if self.stop.is_stopped() {
                self.reporter.warn("渲染被中断。");
                remove_all(&written);
                return Err(PipelineError::Interrupted);
            }

            let canvas = pool.install(|| self.draw_page(document, page));
            let path = output_base.join(format!("page_{:03}.png", page.index + 1));
            if let Err(e) = canvas.save(&path) {
                let _ = fs::remove_file(&path);
                remove_all(&written);
                return Err(e.into());
            }
            self.reporter.progress(page.index + 1, total);
            written.push(path);
        }

        self.reporter
            .info(format!("✅ 已渲染 {} 页到 {}", written.len(), output_base.display()));
        Ok(written)
    }

    fn name(&self) -> &str {
        "raster"
    }
}

/// 出错或中断时清掉已写出的页
fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn draw_rect_outline(canvas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32) {
    let (cw, ch) = canvas.dimensions();
    if w == 0 || h == 0 || x >= cw || y >= ch {
        return;
    }
    let right = (x + w - 1).min(cw - 1);
    let bottom = (y + h - 1).min(ch - 1);
    for px in x..=right {
        canvas.put_pixel(px, y, GRID_LINE);
        canvas.put_pixel(px, bottom, GRID_LINE);
    }
    for py in y..=bottom {
        canvas.put_pixel(x, py, GRID_LINE);
        canvas.put_pixel(right, py, GRID_LINE);
    }
}
