// 该文件是 Saoma （扫码） 项目的一部分。
// src/decoder/rqrr_decoder.rs - rqrr 纯 Rust 解码器
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

use rqrr::PreparedImage;
use tracing::{debug, trace};

use super::{Decoder, DecoderError};
use crate::preprocess::PreparedBuffer;

const RQRR_NAME: &str = "rqrr";

/// 可移植的兜底解码器，任何平台均可用
#[derive(Debug, Clone, Copy)]
pub struct RqrrDecoder {
  /// 正常极性未命中时再尝试反色图像（浅色码 / 深色背景）
  try_inverted: bool,
}

impl Default for RqrrDecoder {
  fn default() -> Self {
    Self { try_inverted: true }
  }
}

impl RqrrDecoder {
  pub fn with_inverted(mut self, try_inverted: bool) -> Self {
    self.try_inverted = try_inverted;
    self
  }

  fn scan(buffer: &PreparedBuffer, inverted: bool) -> Option<String> {
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let raw = buffer.as_raw();

    let mut image = PreparedImage::prepare_from_greyscale(width, height, |x, y| {
      let value = raw[y * width + x];
      if inverted { 255 - value } else { value }
    });

    let grids = image.detect_grids();
    trace!("rqrr 检测到 {} 个网格 (反色: {})", grids.len(), inverted);

    grids.iter().find_map(|grid| match grid.decode() {
      Ok((_meta, content)) if !content.is_empty() => Some(content),
      Ok(_) => None,
      Err(e) => {
        debug!("rqrr 网格解码失败: {:?}", e);
        None
      }
    })
  }
}

impl Decoder for RqrrDecoder {
  fn name(&self) -> &'static str {
    RQRR_NAME
  }

  fn try_decode(&self, buffer: &PreparedBuffer) -> Result<Option<String>, DecoderError> {
    if buffer.width() == 0 || buffer.height() == 0 {
      return Err(DecoderError::Unsupported(RQRR_NAME));
    }

    if let Some(content) = Self::scan(buffer, false) {
      return Ok(Some(content));
    }
    if self.try_inverted {
      return Ok(Self::scan(buffer, true));
    }
    Ok(None)
  }
}
