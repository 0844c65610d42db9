// 该文件是 Saoma （扫码） 项目的一部分。
// src/input.rs - 帧输入源
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

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod image_source;
pub use self::image_source::ImageSource;

#[cfg(feature = "v4l_input")]
mod v4l2_source;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_source::V4l2Source;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图片解码失败: {0}")]
  ImageDecode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("设备不可用 {path}: {reason}")]
  DeviceUnavailable { path: String, reason: String },
  #[error("无权访问设备: {0}")]
  PermissionDenied(String),
  #[error("采集失败: {0}")]
  Capture(String),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSourceType {
  /// 静态图片
  Image,
  /// V4L2 摄像头
  V4l2,
}

/// 输入源 trait
pub trait InputSource: Iterator<Item = Result<Frame, InputError>> {
  /// 获取输入源类型
  fn source_type(&self) -> InputSourceType;

  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;
}

/// 检查 URL scheme 是否与输入源匹配
pub(crate) fn expect_scheme<T: FromUrlWithScheme>(url: &Url) -> Result<(), InputError> {
  if url.scheme() != T::SCHEME {
    error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      T::SCHEME,
      url.scheme()
    );
    return Err(InputError::SchemeMismatch);
  }
  Ok(())
}

/// 读取 URL 查询参数中的数值
pub(crate) fn query_u32(url: &Url, key: &str) -> Option<u32> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse().ok())
}

/// 根据 URL scheme 创建输入源
///
/// - `image:///path/to/file.jpg`
/// - `v4l:///dev/video0`（需启用 `v4l_input`）
pub fn create_input_source(url: &Url) -> Result<Box<dyn InputSource>, InputError> {
  if url.scheme() == ImageSource::SCHEME {
    return Ok(Box::new(ImageSource::from_url(url)?));
  }
  #[cfg(feature = "v4l_input")]
  {
    if url.scheme() == V4l2Source::SCHEME {
      return Ok(Box::new(V4l2Source::from_url(url)?));
    }
  }
  error!("不支持的输入 scheme: {}", url.scheme());
  Err(InputError::SchemeMismatch)
}

/// 将 YUYV (4:2:2) 数据转换为 RGB
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}
