//! 单文件 PDF 输出
//!
//! 每个 `PageLayout` 一页，浅灰网格，图片按排版坐标绘制。
//! 排版坐标以左上角为原点，PDF 以左下角为原点，绘制时翻转 y。

use super::{DocumentLayout, PageLayout, PlacedImage};
use super::render::DocumentRenderer;
use crate::core::error::PipelineError;
use crate::core::progress::{ProgressReporter, StopSignal};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ColorType;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

const GRID_GRAY: f32 = 211.0 / 255.0;
const GRID_LINE_WIDTH: f32 = 0.5;
const JPEG_QUALITY: u8 = 90;

/// 编码后的 JPEG 图片
struct EmbeddedImage {
    width: u32,
    height: u32,
    jpeg: Vec<u8>,
}

pub struct PdfRenderer {
    /// 嵌入图片的最大分辨率，超过按显示尺寸缩小
    dpi: f32,
    threads: usize,
    reporter: ProgressReporter,
    stop: StopSignal,
}

impl PdfRenderer {
    pub fn new() -> Self {
        Self {
            dpi: 200.0,
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

    fn embed(&self, img: &PlacedImage) -> Result<EmbeddedImage, PipelineError> {
        let source = image::open(&img.path)?;
        let max_w = (img.display_width * self.dpi / 72.0).ceil().max(1.0) as u32;
        let max_h = (img.display_height * self.dpi / 72.0).ceil().max(1.0) as u32;
        let source = if source.width() > max_w || source.height() > max_h {
            source.resize(max_w, max_h, FilterType::Triangle)
        } else {
            source
        };
        let rgb = source.to_rgb8();

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ColorType::Rgb8,
        )?;
        Ok(EmbeddedImage {
            width: rgb.width(),
            height: rgb.height(),
            jpeg,
        })
    }

    /// 写入一页，返回页对象
    fn add_page(
        &self,
        doc: &mut Document,
        pool: &rayon::ThreadPool,
        pages_id: ObjectId,
        document: &DocumentLayout,
        page: &PageLayout,
    ) -> Result<ObjectId, PipelineError> {
        let page_h = document.page.page_height;
        let cell_w = document.cell.cell_width;
        let cell_h = document.cell.cell_height;

        let mut ops = vec![
            Operation::new("q", vec![]),
            Operation::new("G", vec![GRID_GRAY.into()]),
            Operation::new("w", vec![GRID_LINE_WIDTH.into()]),
        ];
        for cell in &page.cells {
            ops.push(Operation::new(
                "re",
                vec![
                    cell.x.into(),
                    (page_h - cell.y - cell_h).into(),
                    cell_w.into(),
                    cell_h.into(),
                ],
            ));
        }
        ops.push(Operation::new("S", vec![]));
        ops.push(Operation::new("Q", vec![]));

        // 解码与 JPEG 编码并行，写入保持顺序
        let placed: Vec<&PlacedImage> = page.cells.iter().filter_map(|c| c.image.as_ref()).collect();
        let embedded: Vec<Result<EmbeddedImage, PipelineError>> =
            pool.install(|| placed.par_iter().map(|img| self.embed(img)).collect());

        let mut xobjects = Dictionary::new();
        for (n, (result, img)) in embedded.into_iter().zip(&placed).enumerate() {
            let data = match result {
                Ok(data) => data,
                Err(e) => {
                    self.reporter
                        .warn(format!("嵌入图片失败 {}: {}", img.path.display(), e));
                    continue;
                }
            };
            let stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => data.width as i64,
                    "Height" => data.height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8i64,
                    "Filter" => "DCTDecode",
                },
                data.jpeg,
            )
            .with_compression(false);
            let image_id = doc.add_object(stream);

            let name = format!("Im{}", n + 1);
            xobjects.set(name.as_str(), image_id);
            ops.push(Operation::new("q", vec![]));
            ops.push(Operation::new(
                "cm",
                vec![
                    img.display_width.into(),
                    0.0f32.into(),
                    0.0f32.into(),
                    img.display_height.into(),
                    img.x.into(),
                    (page_h - img.y - img.display_height).into(),
                ],
            ));
            ops.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
            ops.push(Operation::new("Q", vec![]));
        }

        let content = Content { operations: ops }
            .encode()
            .map_err(|e| PipelineError::Render(format!("failed to encode page content: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        Ok(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.0f32.into(),
                0.0f32.into(),
                document.page.page_width.into(),
                page_h.into(),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        }))
    }
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// 非 ASCII 标题用 UTF-16BE 带 BOM
fn text_string(text: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

impl DocumentRenderer for PdfRenderer {
    /// 写出 `<base>.pdf`
    fn render(&self, document: &DocumentLayout, output_base: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let path = super::render::with_suffix(output_base, ".pdf");
        super::render::ensure_parent(&path)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| PipelineError::Render(format!("failed to build render pool: {}", e)))?;

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let total = document.page_count();
        let mut kids: Vec<Object> = Vec::with_capacity(total);

        for page in document.pages() {
            // 文件在最后一次性写出，中断时磁盘上没有残留
            if self.stop.is_stopped() {
                self.reporter.warn("PDF 生成被中断。");
                return Err(PipelineError::Interrupted);
            }
            let page_id = self.add_page(&mut doc, &pool, pages_id, document, page)?;
            kids.push(page_id.into());
            self.reporter.progress(page.index + 1, total);
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => kids.len() as i64,
                "Kids" => kids,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => text_string(&document.title),
            "Producer" => Object::string_literal("evidence_lib"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.compress();

        if let Err(e) = doc.save(&path) {
            let _ = fs::remove_file(&path);
            return Err(PipelineError::resource(&path, e));
        }
        self.reporter
            .info(format!("✅ PDF 已生成: {} ({} 页)", path.display(), total));
        Ok(vec![path])
    }

    fn name(&self) -> &str {
        "pdf"
    }
}
