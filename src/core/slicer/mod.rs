//! 长截图切片器
//!
//! 按固定高度、带重叠的滑动窗口把一张长图切成多张竖向条带：
//! 1. 步长 = max(1, slice_height - overlap)
//! 2. 末尾过小的残片（既小于 overlap 一半，又小于 slice_height 的 20%）直接丢弃
//! 3. 单张切片失败只记录并跳过，源图不可读则整体失败
//!
//! 末尾窗口可能完全落在前一个窗口内（如 H=1850, 1000/100 时的 1800..1850），
//! 只要不满足残片条件就保留，切片数仍按步长计算。

use crate::core::config::validate_slicing;
use crate::core::error::PipelineError;
use crate::core::progress::{ProgressReporter, StopSignal};
use image::codecs::webp::WebPEncoder;
use image::{ColorType, DynamicImage, ImageFormat};
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 一条切片窗口 `[start_y, end_y)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SliceBand {
    pub index: usize,
    pub start_y: u32,
    pub end_y: u32,
}

impl SliceBand {
    pub fn height(&self) -> u32 {
        self.end_y - self.start_y
    }
}

/// 已写盘的切片
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slice {
    pub index: usize,
    pub start_y: u32,
    pub end_y: u32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceConfig {
    pub slice_height: u32,
    pub overlap: u32,
}

impl SliceConfig {
    pub fn new(slice_height: u32, overlap: u32) -> Result<Self, PipelineError> {
        validate_slicing(slice_height, overlap)?;
        Ok(Self {
            slice_height,
            overlap,
        })
    }

    pub fn effective_step(&self) -> u32 {
        self.slice_height.saturating_sub(self.overlap).max(1)
    }

    /// 预估切片数，用于进度上报
    pub fn estimated_total(&self, image_height: u32) -> usize {
        if image_height <= self.slice_height {
            return 1;
        }
        image_height.div_ceil(self.effective_step()) as usize
    }

    /// 末尾残片判定
    fn is_residual_tail(&self, band_height: u32) -> bool {
        (band_height as f32) < self.overlap as f32 * 0.5
            && (band_height as f32) < self.slice_height as f32 * 0.2
    }

    /// 计算全部切片窗口（纯几何，不读写文件）
    pub fn plan(&self, image_height: u32) -> Vec<SliceBand> {
        let step = self.effective_step();
        let mut bands = Vec::new();
        let mut start_y = 0u32;

        while start_y < image_height {
            let end_y = start_y.saturating_add(self.slice_height).min(image_height);
            let band = SliceBand {
                index: bands.len(),
                start_y,
                end_y,
            };
            if start_y > 0 && self.is_residual_tail(band.height()) {
                break;
            }
            bands.push(band);
            start_y = match start_y.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }

        bands
    }
}

/// 切片结果：被中断时已完成的切片仍然有效
#[derive(Debug, Clone, Default)]
pub struct SliceOutcome {
    pub slices: Vec<Slice>,
    pub failed: usize,
    pub interrupted: bool,
}

impl SliceOutcome {
    pub fn paths(&self) -> Vec<PathBuf> {
        self.slices.iter().map(|s| s.path.clone()).collect()
    }
}

pub struct ImageSlicer {
    config: SliceConfig,
    reporter: ProgressReporter,
    stop: StopSignal,
}

impl ImageSlicer {
    pub fn new(config: SliceConfig) -> Self {
        Self {
            config,
            reporter: ProgressReporter::silent(),
            stop: StopSignal::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// 切分 `source` 并把切片写入 `output_dir`（不存在则创建）
    pub fn slice(&self, source: &Path, output_dir: &Path) -> Result<SliceOutcome, PipelineError> {
        if !source.is_file() {
            self.reporter
                .error(format!("源图片未找到: {}", source.display()));
            return Err(PipelineError::resource(source, "source image not found"));
        }
        fs::create_dir_all(output_dir).map_err(|e| {
            self.reporter
                .error(format!("创建切片输出目录失败 {}: {}", output_dir.display(), e));
            PipelineError::resource(output_dir, e)
        })?;

        self.reporter.info(format!("正在打开图片: {}", file_name(source)));
        let (img, source_format) = open_with_format(source).map_err(|e| {
            self.reporter
                .error(format!("打开或解码图片失败 {}: {}", source.display(), e));
            PipelineError::resource(source, e)
        })?;

        let (width, height) = (img.width(), img.height());
        let (save_format, extension) = output_format(source_format);
        let bands = self.config.plan(height);
        let total = self.config.estimated_total(height);

        self.reporter
            .info(format!("图片尺寸: Width={}, Height={}", width, height));
        self.reporter.info(format!(
            "裁剪参数: Slice Height={}, Overlap={}, 预计切片数量: {}",
            self.config.slice_height, self.config.overlap, total
        ));

        let mut outcome = SliceOutcome::default();

        for band in &bands {
            if self.stop.is_stopped() {
                self.reporter.warn("切片被中断。");
                outcome.interrupted = true;
                break;
            }

            self.reporter.debug(format!(
                "正在裁剪切片 {}/{}: Y={} to Y={}",
                band.index + 1,
                total,
                band.start_y,
                band.end_y
            ));

            let path = output_dir.join(format!("slice_{:04}.{}", band.index, extension));
            match Self::write_band(&img, width, band, &path, save_format) {
                Ok(()) => {
                    outcome.slices.push(Slice {
                        index: band.index,
                        start_y: band.start_y,
                        end_y: band.end_y,
                        path,
                    });
                }
                Err(e) => {
                    self.reporter
                        .warn(format!("裁剪或保存切片 {} 出错: {}", band.index + 1, e));
                    outcome.failed += 1;
                }
            }
            self.reporter.progress(band.index + 1, total);
        }

        if !outcome.interrupted {
            self.reporter.progress(total, total);
        }
        self.reporter.info(format!(
            "裁剪完成，成功生成 {} 个切片。",
            outcome.slices.len()
        ));
        Ok(outcome)
    }

    fn write_band(
        img: &DynamicImage,
        width: u32,
        band: &SliceBand,
        path: &Path,
        format: ImageFormat,
    ) -> Result<(), PipelineError> {
        let cropped = img.crop_imm(0, band.start_y, width, band.height());
        // JPEG 不支持 alpha 通道
        let cropped = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(cropped.to_rgb8())
        } else {
            cropped
        };
        let saved = if format == ImageFormat::WebP {
            save_lossless_webp(&cropped, path)
        } else {
            cropped.save_with_format(path, format).map_err(PipelineError::from)
        };
        if let Err(e) = saved {
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(())
    }
}

fn open_with_format(path: &Path) -> Result<(DynamicImage, Option<ImageFormat>), PipelineError> {
    let file = fs::File::open(path)?;
    let reader = image::io::Reader::new(BufReader::new(file)).with_guessed_format()?;
    let format = reader.format();
    let img = reader.decode()?;
    Ok((img, format))
}

/// WebP 只有无损编码器可用
fn save_lossless_webp(img: &DynamicImage, path: &Path) -> Result<(), PipelineError> {
    let rgba = img.to_rgba8();
    let mut writer = BufWriter::new(fs::File::create(path)?);
    WebPEncoder::new_lossless(&mut writer).encode(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        ColorType::Rgba8,
    )?;
    writer.flush()?;
    Ok(())
}

/// 保留原格式（png/jpeg/bmp/webp），否则回退到无损 PNG
fn output_format(source: Option<ImageFormat>) -> (ImageFormat, &'static str) {
    match source {
        Some(ImageFormat::Jpeg) => (ImageFormat::Jpeg, "jpg"),
        Some(ImageFormat::Bmp) => (ImageFormat::Bmp, "bmp"),
        Some(ImageFormat::WebP) => (ImageFormat::WebP, "webp"),
        _ => (ImageFormat::Png, "png"),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn create_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbImage::from_fn(width, height, |_, y| Rgb([(y % 256) as u8, 0, 0]));
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn ranges(bands: &[SliceBand]) -> Vec<(u32, u32)> {
        bands.iter().map(|b| (b.start_y, b.end_y)).collect()
    }

    #[test]
    fn test_plan_scenario_2500() {
        let config = SliceConfig::new(1000, 100).unwrap();
        let bands = config.plan(2500);
        assert_eq!(ranges(&bands), vec![(0, 1000), (900, 1900), (1800, 2500)]);
    }

    #[test]
    fn test_plan_short_image_is_single_slice() {
        let config = SliceConfig::new(1000, 100).unwrap();
        assert_eq!(ranges(&config.plan(1000)), vec![(0, 1000)]);
        assert_eq!(ranges(&config.plan(10)), vec![(0, 10)]);
        assert_eq!(config.estimated_total(10), 1);
    }

    #[test]
    fn test_plan_drops_residual_tail() {
        // 步长 900：第三个窗口从 1800 开始只剩 40px，小于 overlap/2 与 20%
        let config = SliceConfig::new(1000, 100).unwrap();
        let bands = config.plan(1840);
        assert_eq!(ranges(&bands), vec![(0, 1000), (900, 1840)]);
    }

    #[test]
    fn test_plan_keeps_tail_when_overlap_zero() {
        // overlap=0 时 "小于 overlap 的一半" 永远不成立
        let config = SliceConfig::new(100, 0).unwrap();
        assert_eq!(ranges(&config.plan(201)), vec![(0, 100), (100, 200), (200, 201)]);
    }

    #[test]
    fn test_plan_covers_image_with_exact_overlap() {
        for &(slice_height, overlap) in &[(1000u32, 100u32), (300, 299), (512, 64), (50, 10)] {
            let config = SliceConfig::new(slice_height, overlap).unwrap();
            let step = config.effective_step();
            for height in [1u32, 49, 999, 1000, 1001, 2500, 4097] {
                let bands = config.plan(height);
                assert_eq!(bands[0].start_y, 0);
                assert_eq!(bands.last().unwrap().end_y, height);
                for pair in bands.windows(2) {
                    assert!(pair[1].start_y < pair[0].end_y, "gap in coverage");
                    assert_eq!(pair[1].start_y - pair[0].start_y, step);
                    if pair[1].end_y < height {
                        assert_eq!(pair[0].end_y - pair[1].start_y, slice_height - step);
                    }
                }
                for band in &bands {
                    assert!(band.height() <= slice_height);
                }
            }
        }
    }

    #[test]
    fn test_plan_count_follows_step() {
        // 末尾窗口未被丢弃时 count == ceil((H - overlap) / step)
        let config = SliceConfig::new(1000, 100).unwrap();
        for height in [1001u32, 1840, 2500, 2701, 5000] {
            let expected = (height - 100).div_ceil(900) as usize;
            assert_eq!(config.plan(height).len(), expected, "H={}", height);
        }
    }

    #[test]
    fn test_plan_keeps_tail_inside_previous_band() {
        // 50px 末尾不小于 overlap/2，保留，即使整段落在前一个窗口内
        let config = SliceConfig::new(1000, 100).unwrap();
        assert_eq!(
            ranges(&config.plan(1850)),
            vec![(0, 1000), (900, 1850), (1800, 1850)]
        );
        assert_eq!(
            ranges(&config.plan(1899)),
            vec![(0, 1000), (900, 1899), (1800, 1899)]
        );
        // 49px 满足残片条件被丢弃
        assert_eq!(ranges(&config.plan(1849)), vec![(0, 1000), (900, 1849)]);
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        assert!(SliceConfig::new(100, 100).unwrap_err().is_config());
        assert!(SliceConfig::new(0, 0).unwrap_err().is_config());
    }

    #[test]
    fn test_slice_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_test_image(dir.path(), "long.png", 20, 250);
        let out = dir.path().join("slices");

        let slicer = ImageSlicer::new(SliceConfig::new(100, 10).unwrap());
        let outcome = slicer.slice(&source, &out).unwrap();

        assert!(!outcome.interrupted);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.slices.len(), 3);
        assert_eq!(outcome.slices[2].start_y, 180);
        assert_eq!(outcome.slices[2].end_y, 250);
        assert_eq!(outcome.slices[0].path, out.join("slice_0000.png"));

        let last = image::open(&outcome.slices[2].path).unwrap();
        assert_eq!((last.width(), last.height()), (20, 70));
    }

    #[test]
    fn test_slice_preserves_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_test_image(dir.path(), "long.jpg", 16, 120);
        let outcome = ImageSlicer::new(SliceConfig::new(100, 20).unwrap())
            .slice(&source, &dir.path().join("out"))
            .unwrap();
        assert_eq!(outcome.slices.len(), 2);
        assert!(outcome.slices[0].path.to_string_lossy().ends_with(".jpg"));
    }

    #[test]
    fn test_slice_preserves_webp() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("long.webp");
        let img = RgbImage::from_fn(12, 150, |_, y| Rgb([0, (y % 256) as u8, 0]));
        let file = fs::File::create(&source).unwrap();
        WebPEncoder::new_lossless(file)
            .encode(img.as_raw(), 12, 150, ColorType::Rgb8)
            .unwrap();

        let outcome = ImageSlicer::new(SliceConfig::new(100, 20).unwrap())
            .slice(&source, &dir.path().join("out"))
            .unwrap();
        assert_eq!(outcome.slices.len(), 2);
        let first = &outcome.slices[0].path;
        assert!(first.to_string_lossy().ends_with(".webp"));
        assert_eq!(image::ImageFormat::from_path(first).unwrap(), ImageFormat::WebP);
        let decoded = image::open(first).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 100));
    }

    #[test]
    fn test_corrupt_source_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        fs::write(&source, b"definitely not a png").unwrap();

        let result = ImageSlicer::new(SliceConfig::new(100, 10).unwrap())
            .slice(&source, &dir.path().join("out"));
        assert!(matches!(result, Err(PipelineError::Resource { .. })));
    }

    #[test]
    fn test_missing_source_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageSlicer::new(SliceConfig::new(100, 10).unwrap())
            .slice(&dir.path().join("nope.png"), &dir.path().join("out"));
        assert!(matches!(result, Err(PipelineError::Resource { .. })));
    }

    #[test]
    fn test_stop_before_start_keeps_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_test_image(dir.path(), "long.png", 8, 300);
        let stop = StopSignal::new();
        stop.stop();

        let outcome = ImageSlicer::new(SliceConfig::new(100, 10).unwrap())
            .with_stop_signal(stop)
            .slice(&source, &dir.path().join("out"))
            .unwrap();
        assert!(outcome.interrupted);
        assert!(outcome.slices.is_empty());
    }
}
