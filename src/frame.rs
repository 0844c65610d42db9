// 该文件是 Saoma （扫码） 项目的一部分。
// src/frame.rs - 帧与扫描候选定义
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

use std::fmt;

use image::RgbImage;
use thiserror::Error;

/// 浮点误差容限，用于区域边界校验
const REGION_EPSILON: f32 = 1e-6;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      index: 0,
      timestamp_ms: 0,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn is_empty(&self) -> bool {
    self.image.width() == 0 || self.image.height() == 0
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum RegionError {
  #[error("区域参数越界: x={x}, y={y}, w={w}, h={h}")]
  OutOfBounds { x: f32, y: f32, w: f32, h: f32 },
  #[error("区域面积为零")]
  Empty,
}

/// 归一化裁剪区域，所有分量均位于 `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
  x: f32,
  y: f32,
  w: f32,
  h: f32,
}

impl Region {
  /// 整帧
  pub const FULL: Region = Region::raw(0.0, 0.0, 1.0, 1.0);

  pub fn new(x: f32, y: f32, w: f32, h: f32) -> Result<Self, RegionError> {
    if !(w > 0.0 && h > 0.0) {
      return Err(RegionError::Empty);
    }
    let in_unit = |v: f32| (0.0..=1.0).contains(&v);
    if !in_unit(x)
      || !in_unit(y)
      || x + w > 1.0 + REGION_EPSILON
      || y + h > 1.0 + REGION_EPSILON
    {
      return Err(RegionError::OutOfBounds { x, y, w, h });
    }
    Ok(Self { x, y, w, h })
  }

  /// 仅供内置常量使用，调用方保证满足区域不变量
  pub(crate) const fn raw(x: f32, y: f32, w: f32, h: f32) -> Self {
    Self { x, y, w, h }
  }

  pub fn x(&self) -> f32 {
    self.x
  }

  pub fn y(&self) -> f32 {
    self.y
  }

  pub fn w(&self) -> f32 {
    self.w
  }

  pub fn h(&self) -> f32 {
    self.h
  }

  /// 按帧的真实尺寸计算像素矩形 `(sx, sy, sw, sh)`
  ///
  /// 向下取整，每个轴至少 1 像素，并保证矩形落在帧内。
  /// 调用方需保证 `width`、`height` 均大于零。
  pub fn pixel_rect(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (sx, sw) = axis_span(self.x, self.w, width);
    let (sy, sh) = axis_span(self.y, self.h, height);
    (sx, sy, sw, sh)
  }
}

fn axis_span(offset: f32, extent: f32, size: u32) -> (u32, u32) {
  let start = ((offset * size as f32).floor().max(0.0) as u32).min(size.saturating_sub(1));
  let len = ((extent * size as f32).floor() as u32).max(1);
  (start, len.min(size - start))
}

impl fmt::Display for Region {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "({:.2}, {:.2}, {:.2}x{:.2})",
      self.x, self.y, self.w, self.h
    )
  }
}

/// 顺时针旋转角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub const ALL: [Rotation; 4] = [
    Rotation::Deg0,
    Rotation::Deg90,
    Rotation::Deg180,
    Rotation::Deg270,
  ];

  pub fn degrees(self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  pub fn from_degrees(degrees: u32) -> Option<Self> {
    match degrees % 360 {
      0 => Some(Rotation::Deg0),
      90 => Some(Rotation::Deg90),
      180 => Some(Rotation::Deg180),
      270 => Some(Rotation::Deg270),
      _ => None,
    }
  }

  /// 90°/270° 时输出宽高互换
  pub fn swaps_axes(self) -> bool {
    matches!(self, Rotation::Deg90 | Rotation::Deg270)
  }
}

impl fmt::Display for Rotation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}°", self.degrees())
  }
}

/// 整数倍缩放因子（最近邻采样）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale(u32);

impl Scale {
  pub const X1: Scale = Scale(1);
  pub const X2: Scale = Scale(2);

  pub fn new(factor: u32) -> Option<Self> {
    (factor >= 1).then_some(Scale(factor))
  }

  pub fn factor(self) -> u32 {
    self.0
  }
}

impl fmt::Display for Scale {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x", self.0)
  }
}

/// 一次预处理配置：区域 × 旋转 × 缩放
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepCandidate {
  pub region: Region,
  pub rotation: Rotation,
  pub scale: Scale,
}

impl SweepCandidate {
  pub fn new(region: Region, rotation: Rotation, scale: Scale) -> Self {
    Self {
      region,
      rotation,
      scale,
    }
  }

  /// 整帧、不旋转、不缩放
  pub fn full_frame(rotation: Rotation) -> Self {
    Self::new(Region::FULL, rotation, Scale::X1)
  }
}

impl fmt::Display for SweepCandidate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} @ {} × {}", self.region, self.rotation, self.scale)
  }
}
