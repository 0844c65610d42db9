// 该文件是 Saoma （扫码） 项目的一部分。
// src/input/image_source.rs - 静态图片输入源
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

use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use tracing::{debug, info};
use url::Url;

use super::{InputError, InputSource, InputSourceType, expect_scheme, query_u32};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  preprocess::{DEFAULT_LONG_SIDE_MAX, cap_long_side},
  url_file_path,
};

const LONG_SIDE_QUERY: &str = "long_side";

/// 图片输入源
///
/// 解码时应用 EXIF 方向，输出长边不超过上限的工作帧，只产出一帧。
/// 原始字节保留供 OCR 回退使用，全分辨率图像在缩放后立即释放。
pub struct ImageSource {
  /// 原始编码字节
  bytes: Vec<u8>,
  /// 工作帧
  working: Option<RgbImage>,
  /// 工作帧宽度
  width: u32,
  /// 工作帧高度
  height: u32,
}

impl ImageSource {
  pub fn from_bytes(bytes: Vec<u8>, max_long_side: u32) -> Result<Self, InputError> {
    let original = decode_oriented(&bytes)?;
    let (full_width, full_height) = original.dimensions();
    let capped = match cap_long_side(&original, max_long_side) {
      Cow::Owned(capped) => Some(capped),
      Cow::Borrowed(_) => None,
    };
    // 已缩放时全分辨率图像在此释放
    let working = capped.unwrap_or(original);
    let (width, height) = working.dimensions();
    info!(
      "图片已解码: {}x{} -> 工作帧 {}x{}",
      full_width, full_height, width, height
    );

    Ok(Self {
      bytes,
      working: Some(working),
      width,
      height,
    })
  }

  pub fn open(path: impl AsRef<Path>, max_long_side: u32) -> Result<Self, InputError> {
    let path = path.as_ref();
    debug!("读取图片文件: {}", path.display());
    Self::from_bytes(std::fs::read(path)?, max_long_side)
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

}

/// 解码并按 EXIF 方向校正
fn decode_oriented(bytes: &[u8]) -> Result<RgbImage, InputError> {
  let mut decoder = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()?
    .into_decoder()?;
  let orientation = decoder.orientation()?;
  let mut image = DynamicImage::from_decoder(decoder)?;
  image.apply_orientation(orientation);
  Ok(image.to_rgb8())
}

impl FromUrl for ImageSource {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    expect_scheme::<Self>(url)?;
    let max_long_side = query_u32(url, LONG_SIDE_QUERY).unwrap_or(DEFAULT_LONG_SIDE_MAX);
    Self::open(url_file_path(url), max_long_side)
  }
}

impl FromUrlWithScheme for ImageSource {
  const SCHEME: &'static str = "image";
}

impl Iterator for ImageSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.working.take().map(|image| Ok(Frame::new(image)))
  }
}

impl InputSource for ImageSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::Image
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    None
  }
}
