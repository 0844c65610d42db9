// 该文件是 Saoma （扫码） 项目的一部分。
// src/preprocess.rs - 帧预处理：裁剪、旋转、缩放、灰度增强
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # 预处理
//!
//! 对一帧 RGB 图像依次执行：
//!
//! 1. 按归一化区域裁剪（向下取整，每轴至少 1 像素）；
//! 2. 顺时针旋转 0°/90°/180°/270°，90°/270° 时宽高互换；
//! 3. 最近邻整数倍放大（不做平滑，保持码元边缘锐利）；
//! 4. Rec.709 灰度化，可选以 128 为中点做对比度拉伸并截断到 `[0, 255]`。
//!
//! 四步在一次遍历中完成：对每个输出像素反推其在原帧中的坐标，
//! 结果写入可复用的 [`PreparedBuffer`]。

use std::borrow::Cow;

use image::{GrayImage, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{Rotation, SweepCandidate};

/// 扫描工作分辨率的默认长边上限
pub const DEFAULT_LONG_SIDE_MAX: u32 = 1024;
/// 默认对比度增益
pub const DEFAULT_CONTRAST_GAIN: f32 = 1.2;

const CONTRAST_MID: f32 = 128.0;
const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("输入帧面积为零")]
  EmptyFrame,
}

/// 预处理后的 8 位灰度缓冲区
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedBuffer {
  width: u32,
  height: u32,
  data: Vec<u8>,
}

impl PreparedBuffer {
  pub fn from_gray(image: GrayImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_raw(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, y: u32) -> u8 {
    self.data[(y * self.width + x) as usize]
  }

  pub fn to_gray_image(&self) -> Option<GrayImage> {
    GrayImage::from_raw(self.width, self.height, self.data.clone())
  }

  /// 重设尺寸并清空内容，保留已分配的容量
  fn reset(&mut self, width: u32, height: u32) {
    self.width = width;
    self.height = height;
    self.data.clear();
    self.data.reserve((width as usize) * (height as usize));
  }
}

/// 无状态预处理器，仅保存对比度增益
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
  contrast_gain: f32,
}

impl Default for Preprocessor {
  fn default() -> Self {
    Self::new(DEFAULT_CONTRAST_GAIN)
  }
}

impl Preprocessor {
  pub fn new(contrast_gain: f32) -> Self {
    Self { contrast_gain }
  }

  pub fn contrast_gain(&self) -> f32 {
    self.contrast_gain
  }

  pub fn prepare(
    &self,
    image: &RgbImage,
    candidate: &SweepCandidate,
    enhance: bool,
  ) -> Result<PreparedBuffer, PreprocessError> {
    let mut out = PreparedBuffer::default();
    self.prepare_into(image, candidate, enhance, &mut out)?;
    Ok(out)
  }

  pub fn prepare_into(
    &self,
    image: &RgbImage,
    candidate: &SweepCandidate,
    enhance: bool,
    out: &mut PreparedBuffer,
  ) -> Result<(), PreprocessError> {
    let (frame_w, frame_h) = image.dimensions();
    if frame_w == 0 || frame_h == 0 {
      return Err(PreprocessError::EmptyFrame);
    }

    let (sx, sy, sw, sh) = candidate.region.pixel_rect(frame_w, frame_h);
    let factor = candidate.scale.factor();
    let (scaled_w, scaled_h) = (sw * factor, sh * factor);
    let (out_w, out_h) = if candidate.rotation.swaps_axes() {
      (scaled_h, scaled_w)
    } else {
      (scaled_w, scaled_h)
    };

    out.reset(out_w, out_h);
    let raw = image.as_raw();

    for oy in 0..out_h {
      for ox in 0..out_w {
        // 反推旋转前（缩放后裁剪图）中的坐标
        let (ux, uy) = match candidate.rotation {
          Rotation::Deg0 => (ox, oy),
          Rotation::Deg90 => (oy, scaled_h - 1 - ox),
          Rotation::Deg180 => (scaled_w - 1 - ox, scaled_h - 1 - oy),
          Rotation::Deg270 => (scaled_w - 1 - oy, ox),
        };
        let px = sx + ux / factor;
        let py = sy + uy / factor;
        let idx = ((py * frame_w + px) * 3) as usize;
        out
          .data
          .push(self.luma(raw[idx], raw[idx + 1], raw[idx + 2], enhance));
      }
    }

    Ok(())
  }

  fn luma(&self, r: u8, g: u8, b: u8, enhance: bool) -> u8 {
    let gray =
      r as f32 * LUMA_WEIGHTS[0] + g as f32 * LUMA_WEIGHTS[1] + b as f32 * LUMA_WEIGHTS[2];
    if enhance {
      ((gray - CONTRAST_MID) * self.contrast_gain + CONTRAST_MID).clamp(0.0, 255.0) as u8
    } else {
      gray.round().clamp(0.0, 255.0) as u8
    }
  }
}

/// 将图像长边限制在 `max_long_side` 以内，保持宽高比
///
/// 已在上限以内时直接借用原图。
pub fn cap_long_side(image: &RgbImage, max_long_side: u32) -> Cow<'_, RgbImage> {
  let (width, height) = image.dimensions();
  let long_side = width.max(height);
  if max_long_side == 0 || long_side <= max_long_side {
    return Cow::Borrowed(image);
  }

  let scale = max_long_side as f32 / long_side as f32;
  let new_w = ((width as f32 * scale).round() as u32).max(1);
  let new_h = ((height as f32 * scale).round() as u32).max(1);
  debug!(
    "工作分辨率限制: {}x{} -> {}x{}",
    width, height, new_w, new_h
  );

  Cow::Owned(image::imageops::resize(
    image,
    new_w,
    new_h,
    FilterType::Triangle,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{Region, Scale};
  use image::{Luma, Rgb};

  fn gradient(width: u32, height: u32) -> (RgbImage, GrayImage) {
    let rgb = RgbImage::from_fn(width, height, |x, y| {
      let v = (x * 10 + y * 3) as u8;
      Rgb([v, v, v])
    });
    let gray = GrayImage::from_fn(width, height, |x, y| Luma([(x * 10 + y * 3) as u8]));
    (rgb, gray)
  }

  fn prepared(image: &RgbImage, rotation: Rotation, scale: Scale) -> GrayImage {
    Preprocessor::default()
      .prepare(
        image,
        &SweepCandidate::new(Region::FULL, rotation, scale),
        false,
      )
      .unwrap()
      .to_gray_image()
      .unwrap()
  }

  #[test]
  fn rotations_match_imageops() {
    let (rgb, gray) = gradient(5, 3);

    assert_eq!(prepared(&rgb, Rotation::Deg0, Scale::X1), gray);
    assert_eq!(
      prepared(&rgb, Rotation::Deg90, Scale::X1),
      image::imageops::rotate90(&gray)
    );
    assert_eq!(
      prepared(&rgb, Rotation::Deg180, Scale::X1),
      image::imageops::rotate180(&gray)
    );
    assert_eq!(
      prepared(&rgb, Rotation::Deg270, Scale::X1),
      image::imageops::rotate270(&gray)
    );
  }

  #[test]
  fn rotation_swaps_output_dimensions() {
    let (rgb, _) = gradient(6, 4);
    let out = prepared(&rgb, Rotation::Deg90, Scale::X2);
    assert_eq!(out.dimensions(), (8, 12));
  }

  #[test]
  fn integer_scale_uses_nearest_neighbour() {
    let (rgb, gray) = gradient(3, 2);
    let out = prepared(&rgb, Rotation::Deg0, Scale::X2);
    assert_eq!(out.dimensions(), (6, 4));
    for y in 0..4 {
      for x in 0..6 {
        assert_eq!(out.get_pixel(x, y), gray.get_pixel(x / 2, y / 2));
      }
    }
  }

  #[test]
  fn crop_takes_region_pixels() {
    let (rgb, gray) = gradient(8, 8);
    let candidate = SweepCandidate::new(
      Region::new(0.5, 0.25, 0.5, 0.5).unwrap(),
      Rotation::Deg0,
      Scale::X1,
    );
    let out = Preprocessor::default()
      .prepare(&rgb, &candidate, false)
      .unwrap();
    assert_eq!((out.width(), out.height()), (4, 4));
    assert_eq!(out.pixel(0, 0), gray.get_pixel(4, 2)[0]);
    assert_eq!(out.pixel(3, 3), gray.get_pixel(7, 5)[0]);
  }

  #[test]
  fn contrast_stretch_clamps() {
    let image = RgbImage::from_fn(3, 1, |x, _| match x {
      0 => Rgb([10, 10, 10]),
      1 => Rgb([200, 200, 200]),
      _ => Rgb([250, 250, 250]),
    });
    let out = Preprocessor::default()
      .prepare(&image, &SweepCandidate::full_frame(Rotation::Deg0), true)
      .unwrap();
    assert_eq!(out.as_raw(), &[0, 214, 255]);
  }

  #[test]
  fn buffer_is_reused_between_candidates() {
    let (rgb, _) = gradient(16, 16);
    let preprocessor = Preprocessor::default();
    let mut buffer = PreparedBuffer::default();
    preprocessor
      .prepare_into(
        &rgb,
        &SweepCandidate::new(Region::FULL, Rotation::Deg0, Scale::X2),
        true,
        &mut buffer,
      )
      .unwrap();
    let capacity = buffer.data.capacity();
    preprocessor
      .prepare_into(
        &rgb,
        &SweepCandidate::new(
          Region::new(0.0, 0.0, 0.5, 0.5).unwrap(),
          Rotation::Deg90,
          Scale::X1,
        ),
        true,
        &mut buffer,
      )
      .unwrap();
    assert_eq!((buffer.width(), buffer.height()), (8, 8));
    assert_eq!(buffer.data.capacity(), capacity);
  }

  #[test]
  fn empty_frame_is_rejected() {
    let image = RgbImage::new(0, 10);
    assert_eq!(
      Preprocessor::default().prepare(&image, &SweepCandidate::full_frame(Rotation::Deg0), false),
      Err(PreprocessError::EmptyFrame)
    );
  }

  #[test]
  fn cap_long_side_preserves_aspect() {
    let big = RgbImage::new(2048, 1000);
    let capped = cap_long_side(&big, DEFAULT_LONG_SIDE_MAX);
    assert_eq!(capped.dimensions(), (1024, 500));
    assert!(matches!(capped, Cow::Owned(_)));

    let small = RgbImage::new(640, 480);
    assert!(matches!(
      cap_long_side(&small, DEFAULT_LONG_SIDE_MAX),
      Cow::Borrowed(_)
    ));
  }
}
