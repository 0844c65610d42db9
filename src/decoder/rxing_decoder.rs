// 该文件是 Saoma （扫码） 项目的一部分。
// src/decoder/rxing_decoder.rs - rxing（ZXing 移植）解码器
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

use rxing::{BarcodeFormat, Exceptions};
use tracing::trace;

use super::{Decoder, DecoderError};
use crate::preprocess::PreparedBuffer;

const RXING_NAME: &str = "rxing";

/// 鲁棒性更好的 ZXing 系解码器，排在解码链首位
#[derive(Debug, Clone, Copy, Default)]
pub struct RxingDecoder;

impl Decoder for RxingDecoder {
  fn name(&self) -> &'static str {
    RXING_NAME
  }

  fn try_decode(&self, buffer: &PreparedBuffer) -> Result<Option<String>, DecoderError> {
    if buffer.width() == 0 || buffer.height() == 0 {
      return Err(DecoderError::Unsupported(RXING_NAME));
    }

    match rxing::helpers::detect_in_luma(
      buffer.as_raw().to_vec(),
      buffer.width(),
      buffer.height(),
      Some(BarcodeFormat::QR_CODE),
    ) {
      Ok(result) => Ok(Some(result.getText().to_string())),
      Err(Exceptions::NotFoundException(_)) => {
        trace!("rxing 未命中");
        Ok(None)
      }
      Err(e) => Err(DecoderError::Failed {
        decoder: RXING_NAME,
        message: e.to_string(),
      }),
    }
  }
}
