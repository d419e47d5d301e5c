//! 分页排版引擎
//!
//! 输入有序图片 + 行列网格 + 遍历顺序，输出分页文档描述：
//! - 每页 rows x cols 个单元格，单元格为空或放一张等比缩放的图片
//! - grid 行优先，column 列优先
//! - 页与页之间插入分页符，最后一页之后不插入
//! - 单张图片读取失败只留空该单元格

pub mod pdf;
pub mod render;

use crate::core::config::{validate_grid, LayoutOrder, PageSettings};
use crate::core::error::PipelineError;
use crate::core::progress::{ProgressReporter, StopSignal};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use pdf::PdfRenderer;
pub use render::{DocumentRenderer, JsonManifestRenderer, RasterPageRenderer, RendererKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridSpec {
    pub rows: u32,
    pub cols: u32,
    pub order: LayoutOrder,
}

impl GridSpec {
    pub fn new(rows: u32, cols: u32, order: LayoutOrder) -> Result<Self, PipelineError> {
        validate_grid(rows, cols)?;
        Ok(Self { rows, cols, order })
    }

    /// 按名称解析遍历顺序，未知名称回退到 grid 并告警
    pub fn with_order_name(
        rows: u32,
        cols: u32,
        order: &str,
        reporter: &ProgressReporter,
    ) -> Result<Self, PipelineError> {
        let (parsed, known) = LayoutOrder::parse_lenient(order);
        if !known {
            reporter.warn(format!("未知布局 '{}', 使用 grid。", order));
        }
        Self::new(rows, cols, parsed)
    }

    pub fn images_per_page(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// 页内第 `slot` 个图片所在的 (row, col)
    pub fn position(&self, slot: usize) -> (u32, u32) {
        let slot = slot as u32;
        match self.order {
            LayoutOrder::Grid => (slot / self.cols, slot % self.cols),
            LayoutOrder::Column => (slot % self.rows, slot / self.rows),
        }
    }
}

/// 单元格几何 (point)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellGeometry {
    /// 含内边距的单元格总尺寸
    pub cell_width: f32,
    pub cell_height: f32,
    /// 图片可用区域
    pub container_width: f32,
    pub container_height: f32,
    pub padding: f32,
}

impl CellGeometry {
    pub fn compute(page: &PageSettings, grid: &GridSpec) -> Self {
        let cell_width = page.content_width() / grid.cols as f32;
        let cell_height = page.content_height() / grid.rows as f32;
        let padding = page.cell_padding;
        Self {
            cell_width,
            cell_height,
            container_width: (cell_width - 2.0 * padding).max(page.min_cell_size),
            container_height: (cell_height - 2.0 * padding).max(page.min_cell_size),
            padding,
        }
    }
}

/// 等比缩放到容器内，返回显示尺寸；尺寸非法时返回 None
pub fn fit_within(
    intrinsic_width: u32,
    intrinsic_height: u32,
    container_width: f32,
    container_height: f32,
) -> Option<(f32, f32)> {
    if intrinsic_width == 0 || intrinsic_height == 0 {
        return None;
    }
    let (w, h) = (intrinsic_width as f32, intrinsic_height as f32);
    let scale = (container_width / w).min(container_height / h);
    Some((w * scale, h * scale))
}

/// 读取图片像素尺寸的能力
pub trait ImageProbe: Send + Sync {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), PipelineError>;
}

/// 只读取文件头获取尺寸，不解码像素
#[derive(Debug, Default, Clone, Copy)]
pub struct FsImageProbe;

impl ImageProbe for FsImageProbe {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::resource(path, "image file not found"));
        }
        Ok(image::image_dimensions(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedImage {
    pub path: PathBuf,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub display_width: f32,
    pub display_height: f32,
    /// 页面坐标（左上原点）中图片左上角，居中于单元格
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
    /// 单元格左上角（页面坐标）
    pub x: f32,
    pub y: f32,
    pub image: Option<PlacedImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageLayout {
    pub index: usize,
    /// 行优先存放的全部单元格
    pub cells: Vec<Cell>,
}

impl PageLayout {
    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.iter().find(|c| c.row == row && c.col == col)
    }

    pub fn placed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.image.is_some()).count()
    }

    pub fn empty_count(&self) -> usize {
        self.cells.len() - self.placed_count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayoutElement {
    Page(PageLayout),
    PageBreak,
}

/// 交给渲染方的分页文档描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLayout {
    pub title: String,
    pub page: PageSettings,
    pub grid: GridSpec,
    pub cell: CellGeometry,
    pub elements: Vec<LayoutElement>,
}

impl DocumentLayout {
    pub fn pages(&self) -> impl Iterator<Item = &PageLayout> {
        self.elements.iter().filter_map(|e| match e {
            LayoutElement::Page(page) => Some(page),
            LayoutElement::PageBreak => None,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages().count()
    }
}

pub struct LayoutEngine {
    page: PageSettings,
    probe: Arc<dyn ImageProbe>,
    reporter: ProgressReporter,
    stop: StopSignal,
}

impl LayoutEngine {
    pub fn new(page: PageSettings) -> Self {
        Self {
            page,
            probe: Arc::new(FsImageProbe),
            reporter: ProgressReporter::silent(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ImageProbe>) -> Self {
        self.probe = probe;
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

    /// 排版全部图片；中断时丢弃已完成的部分并返回 `Interrupted`
    pub fn layout(
        &self,
        title: &str,
        images: &[PathBuf],
        grid: GridSpec,
    ) -> Result<DocumentLayout, PipelineError> {
        self.page.validate()?;
        validate_grid(grid.rows, grid.cols)?;
        if images.is_empty() {
            self.reporter.warn("无图片可排版。");
            return Err(PipelineError::Render("no images to lay out".into()));
        }

        let cell = CellGeometry::compute(&self.page, &grid);
        let per_page = grid.images_per_page();
        let total = images.len();
        let num_pages = total.div_ceil(per_page);

        self.reporter.info(format!(
            "📄 开始排版: {} 张图片, {} 页 (布局: {:?}, {}x{})",
            total, num_pages, grid.order, grid.rows, grid.cols
        ));

        let mut elements = Vec::with_capacity(num_pages * 2);
        for (page_index, chunk) in images.chunks(per_page).enumerate() {
            if self.stop.is_stopped() {
                self.reporter.warn("排版被中断。");
                return Err(PipelineError::Interrupted);
            }
            self.reporter
                .debug(format!("正在处理第 {}/{} 页...", page_index + 1, num_pages));

            let page = self.layout_page(page_index, chunk, &grid, &cell, total);
            elements.push(LayoutElement::Page(page));
            if page_index + 1 < num_pages {
                elements.push(LayoutElement::PageBreak);
            }
        }

        self.reporter.progress(total, total);
        self.reporter.info(format!("✅ 排版完成，共 {} 页。", num_pages));

        Ok(DocumentLayout {
            title: title.to_string(),
            page: self.page,
            grid,
            cell,
            elements,
        })
    }

    fn layout_page(
        &self,
        page_index: usize,
        chunk: &[PathBuf],
        grid: &GridSpec,
        cell: &CellGeometry,
        total: usize,
    ) -> PageLayout {
        let mut cells: Vec<Cell> = (0..grid.rows)
            .flat_map(|row| (0..grid.cols).map(move |col| (row, col)))
            .map(|(row, col)| Cell {
                row,
                col,
                x: self.page.margin_left + col as f32 * cell.cell_width,
                y: self.page.margin_top + row as f32 * cell.cell_height,
                image: None,
            })
            .collect();

        let first = page_index * grid.images_per_page();
        for (slot, path) in chunk.iter().enumerate() {
            let (row, col) = grid.position(slot);
            let index = (row * grid.cols + col) as usize;
            let target = &mut cells[index];
            target.image = self.place(path, cell, target.x, target.y);
            self.reporter.progress(first + slot + 1, total);
        }

        PageLayout {
            index: page_index,
            cells,
        }
    }

    fn place(&self, path: &Path, cell: &CellGeometry, cell_x: f32, cell_y: f32) -> Option<PlacedImage> {
        let (pixel_width, pixel_height) = match self.probe.dimensions(path) {
            Ok(dims) => dims,
            Err(e) => {
                self.reporter
                    .warn(format!("创建图片对象失败 {}: {}", display_name(path), e));
                return None;
            }
        };
        let Some((display_width, display_height)) =
            fit_within(pixel_width, pixel_height, cell.container_width, cell.container_height)
        else {
            self.reporter
                .warn(format!("图片尺寸无效 {}: {}x{}", display_name(path), pixel_width, pixel_height));
            return None;
        };

        Some(PlacedImage {
            path: path.to_path_buf(),
            pixel_width,
            pixel_height,
            display_width,
            display_height,
            x: cell_x + (cell.cell_width - display_width) / 2.0,
            y: cell_y + (cell.cell_height - display_height) / 2.0,
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MM;
    use std::collections::HashMap;

    /// 固定尺寸的探测器，未登记的文件视为读取失败
    struct StubProbe {
        sizes: HashMap<String, (u32, u32)>,
        default: Option<(u32, u32)>,
    }

    impl StubProbe {
        fn uniform(width: u32, height: u32) -> Self {
            Self {
                sizes: HashMap::new(),
                default: Some((width, height)),
            }
        }

        fn with(mut self, name: &str, size: (u32, u32)) -> Self {
            self.sizes.insert(name.to_string(), size);
            self
        }

        fn strict() -> Self {
            Self {
                sizes: HashMap::new(),
                default: None,
            }
        }
    }

    impl ImageProbe for StubProbe {
        fn dimensions(&self, path: &Path) -> Result<(u32, u32), PipelineError> {
            let name = display_name(path);
            self.sizes
                .get(&name)
                .copied()
                .or(self.default)
                .ok_or_else(|| PipelineError::resource(path, "unreadable"))
        }
    }

    fn create_test_images(count: usize) -> Vec<PathBuf> {
        (1..=count)
            .map(|i| PathBuf::from(format!("img_{}.png", i)))
            .collect()
    }

    fn engine(probe: StubProbe) -> LayoutEngine {
        LayoutEngine::new(PageSettings::default()).with_probe(Arc::new(probe))
    }

    fn slot_of(page: &PageLayout, name: &str) -> Option<(u32, u32)> {
        page.cells.iter().find_map(|c| {
            c.image
                .as_ref()
                .filter(|img| img.path == Path::new(name))
                .map(|_| (c.row, c.col))
        })
    }

    #[test]
    fn test_five_images_two_by_two() {
        let grid = GridSpec::new(2, 2, LayoutOrder::Grid).unwrap();
        let doc = engine(StubProbe::uniform(100, 200))
            .layout("t", &create_test_images(5), grid)
            .unwrap();

        let pages: Vec<&PageLayout> = doc.pages().collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].placed_count(), 4);
        assert_eq!(pages[1].placed_count(), 1);
        assert_eq!(pages[1].empty_count(), 3);

        // 分页符只在页与页之间
        assert_eq!(doc.elements.len(), 3);
        assert!(matches!(doc.elements[1], LayoutElement::PageBreak));
        assert!(matches!(doc.elements.last(), Some(LayoutElement::Page(_))));
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let err = GridSpec::new(65536, 65536, LayoutOrder::Grid).unwrap_err();
        assert!(err.is_config());
        assert_eq!(GridSpec::new(32, 32, LayoutOrder::Grid).unwrap().images_per_page(), 1024);
    }

    #[test]
    fn test_traversal_order() {
        let images = create_test_images(4);

        let grid = GridSpec::new(2, 2, LayoutOrder::Grid).unwrap();
        let doc = engine(StubProbe::uniform(10, 10)).layout("t", &images, grid).unwrap();
        let page = doc.pages().next().unwrap();
        assert_eq!(slot_of(page, "img_2.png"), Some((0, 1)));
        assert_eq!(slot_of(page, "img_3.png"), Some((1, 0)));

        let grid = GridSpec::new(2, 2, LayoutOrder::Column).unwrap();
        let doc = engine(StubProbe::uniform(10, 10)).layout("t", &images, grid).unwrap();
        let page = doc.pages().next().unwrap();
        assert_eq!(slot_of(page, "img_2.png"), Some((1, 0)));
        assert_eq!(slot_of(page, "img_3.png"), Some((0, 1)));
    }

    #[test]
    fn test_unknown_order_falls_back_to_grid() {
        let grid = GridSpec::with_order_name(2, 2, "diagonal", &ProgressReporter::silent()).unwrap();
        assert_eq!(grid.order, LayoutOrder::Grid);
        let grid = GridSpec::with_order_name(2, 2, "Column", &ProgressReporter::silent()).unwrap();
        assert_eq!(grid.order, LayoutOrder::Column);
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        assert_eq!(fit_within(1000, 500, 200.0, 200.0), Some((200.0, 100.0)));
        assert_eq!(fit_within(500, 1000, 200.0, 200.0), Some((100.0, 200.0)));
        assert_eq!(fit_within(0, 10, 200.0, 200.0), None);

        let (w, h) = fit_within(1234, 4321, 170.0, 250.0).unwrap();
        assert!(w <= 170.0 + 1e-3 && h <= 250.0 + 1e-3);
    }

    #[test]
    fn test_small_images_scale_up_to_container() {
        let (w, h) = fit_within(10, 20, 100.0, 100.0).unwrap();
        assert!((h - 100.0).abs() < 1e-4);
        assert!((w - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_cell_geometry_defaults() {
        let grid = GridSpec::new(3, 2, LayoutOrder::Grid).unwrap();
        let page = PageSettings::default();
        let cell = CellGeometry::compute(&page, &grid);

        assert!((cell.cell_width - page.content_width() / 2.0).abs() < 1e-3);
        assert!((cell.container_width - (cell.cell_width - 3.0 * MM)).abs() < 1e-3);
        assert!((cell.container_height - (cell.cell_height - 3.0 * MM)).abs() < 1e-3);
    }

    #[test]
    fn test_container_floor() {
        let grid = GridSpec::new(500, 500, LayoutOrder::Grid).unwrap();
        let cell = CellGeometry::compute(&PageSettings::default(), &grid);
        assert!((cell.container_width - MM).abs() < 1e-4);
        assert!((cell.container_height - MM).abs() < 1e-4);
    }

    #[test]
    fn test_images_centered_in_cell() {
        let grid = GridSpec::new(1, 1, LayoutOrder::Grid).unwrap();
        let doc = engine(StubProbe::uniform(1000, 100))
            .layout("t", &create_test_images(1), grid)
            .unwrap();
        let page = doc.pages().next().unwrap();
        let cell = &page.cells[0];
        let img = cell.image.as_ref().unwrap();

        let left = img.x - cell.x;
        let right = cell.x + doc.cell.cell_width - (img.x + img.display_width);
        assert!((left - right).abs() < 1e-3);
        assert!(img.display_width <= doc.cell.container_width + 1e-3);
    }

    #[test]
    fn test_failed_image_leaves_cell_empty() {
        let probe = StubProbe::strict()
            .with("img_1.png", (10, 10))
            .with("img_3.png", (10, 10));
        let grid = GridSpec::new(1, 3, LayoutOrder::Grid).unwrap();
        let doc = engine(probe).layout("t", &create_test_images(3), grid).unwrap();

        let page = doc.pages().next().unwrap();
        assert_eq!(page.placed_count(), 2);
        assert!(page.cell(0, 1).unwrap().image.is_none());
        assert_eq!(slot_of(page, "img_3.png"), Some((0, 2)));
    }

    #[test]
    fn test_stop_discards_document() {
        let stop = StopSignal::new();
        stop.stop();
        let grid = GridSpec::new(1, 1, LayoutOrder::Grid).unwrap();
        let result = engine(StubProbe::uniform(10, 10))
            .with_stop_signal(stop)
            .layout("t", &create_test_images(2), grid);
        assert!(matches!(result, Err(PipelineError::Interrupted)));
    }

    #[test]
    fn test_empty_input_rejected() {
        let grid = GridSpec::new(1, 1, LayoutOrder::Grid).unwrap();
        assert!(engine(StubProbe::uniform(1, 1)).layout("t", &[], grid).is_err());
        assert!(GridSpec::new(0, 2, LayoutOrder::Grid).unwrap_err().is_config());
    }

    #[test]
    fn test_fs_probe_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.png");
        image::RgbImage::new(7, 3).save(&path).unwrap();

        assert_eq!(FsImageProbe.dimensions(&path).unwrap(), (7, 3));
        assert!(FsImageProbe.dimensions(&dir.path().join("missing.png")).is_err());
    }
}
