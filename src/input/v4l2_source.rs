// 该文件是 Saoma （扫码） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::io;
use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use tracing::{info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{InputError, InputSource, InputSourceType, expect_scheme, query_u32, yuyv_to_rgb};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

/// 扫码需要的最低采集分辨率
pub const MIN_WIDTH: u32 = 640;
pub const MIN_HEIGHT: u32 = 480;

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_FPS: f64 = 30.0;
const BUFFER_COUNT: u32 = 4;

/// V4L2 摄像头输入源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2Source {
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// 设备路径
  path: String,
  /// 帧索引
  frame_index: u64,
  width: u32,
  height: u32,
  fps: f64,
  /// 开始时间
  start_time: Instant,
}

fn device_error(path: &str, err: io::Error) -> InputError {
  match err.kind() {
    io::ErrorKind::PermissionDenied => InputError::PermissionDenied(path.to_string()),
    _ => InputError::DeviceUnavailable {
      path: path.to_string(),
      reason: err.to_string(),
    },
  }
}

impl V4l2Source {
  /// 打开设备并协商 YUYV 格式，分辨率不低于 640x480
  pub fn new(device_path: &str, width: u32, height: u32) -> Result<Self, InputError> {
    let device = Box::pin(Device::with_path(device_path).map_err(|e| device_error(device_path, e))?);

    let mut format = device.format().map_err(|e| device_error(device_path, e))?;
    format.width = width.max(MIN_WIDTH);
    format.height = height.max(MIN_HEIGHT);
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| device_error(device_path, e))?;

    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(InputError::DeviceUnavailable {
        path: device_path.to_string(),
        reason: format!("不支持的像素格式 {}", format.fourcc),
      });
    }
    if format.width < MIN_WIDTH || format.height < MIN_HEIGHT {
      warn!(
        "设备 {} 仅支持 {}x{}，低于 {}x{}",
        device_path, format.width, format.height, MIN_WIDTH, MIN_HEIGHT
      );
    }

    let fps = device
      .params()
      .ok()
      .map(|params| params.interval)
      .filter(|interval| interval.numerator > 0)
      .map(|interval| interval.denominator as f64 / interval.numerator as f64)
      .unwrap_or(DEFAULT_FPS);

    let mut source = Self {
      device,
      stream: None,
      path: device_path.to_string(),
      frame_index: 0,
      width: format.width,
      height: format.height,
      fps,
      start_time: Instant::now(),
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 与 device 存放在同一结构体中，Drop 时先于 device 释放
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, BUFFER_COUNT)
        .map_err(|e| device_error(device_path, e))?
    };
    source.stream = Some(stream);

    info!(
      "摄像头已打开: {} {}x{} @ {:.1} fps",
      device_path, source.width, source.height, source.fps
    );
    Ok(source)
  }
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // 先停止采集流，再释放设备
    self.stream.take();
    info!("摄像头已关闭: {}", self.path);
  }
}

impl FromUrl for V4l2Source {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    expect_scheme::<Self>(url)?;
    let path = match url_file_path(url) {
      p if p.is_empty() || p == "/" => DEFAULT_DEVICE.to_string(),
      p => p,
    };
    let width = query_u32(url, "width").unwrap_or(MIN_WIDTH);
    let height = query_u32(url, "height").unwrap_or(MIN_HEIGHT);
    Self::new(&path, width, height)
  }
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l";
}

impl Iterator for V4l2Source {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer,
      Err(e) => return Some(Err(InputError::Capture(e.to_string()))),
    };

    let rgb = yuyv_to_rgb(buffer, self.width, self.height);
    let Some(image) = RgbImage::from_raw(self.width, self.height, rgb) else {
      return Some(Err(InputError::Capture(format!(
        "帧数据长度与 {}x{} 不符",
        self.width, self.height
      ))));
    };

    let frame = Frame {
      image,
      index: self.frame_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };
    self.frame_index += 1;
    Some(Ok(frame))
  }
}

impl InputSource for V4l2Source {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::V4l2
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(self.fps)
  }
}
