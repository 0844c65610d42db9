// 该文件是 Saoma （扫码） 项目的一部分。
// src/decoder.rs - 解码器与解码链
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

use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::preprocess::PreparedBuffer;

#[derive(Error, Debug)]
pub enum DecoderError {
  #[error("{decoder} 解码失败: {message}")]
  Failed {
    decoder: &'static str,
    message: String,
  },
  #[error("{0} 不支持该缓冲区")]
  Unsupported(&'static str),
}

/// 单个解码能力
///
/// 每次尝试都是独立可失败的；调用方把错误、空结果与不支持一律视为未命中。
pub trait Decoder: Send + Sync {
  fn name(&self) -> &'static str;

  /// 运行时可用性探测，只在构建解码链时调用一次
  fn is_available(&self) -> bool {
    true
  }

  fn try_decode(&self, buffer: &PreparedBuffer) -> Result<Option<String>, DecoderError>;
}

/// 解码命中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeHit {
  pub payload: String,
  pub decoder: &'static str,
}

/// 按优先级排列的解码器列表
pub struct DecoderChain {
  decoders: Vec<Box<dyn Decoder>>,
}

impl DecoderChain {
  /// 探测候选解码器，剔除不可用的成员，保留原有顺序
  pub fn probe(candidates: Vec<Box<dyn Decoder>>) -> Self {
    let decoders: Vec<_> = candidates
      .into_iter()
      .filter(|decoder| {
        let available = decoder.is_available();
        if available {
          info!("解码器可用: {}", decoder.name());
        } else {
          warn!("解码器不可用，已跳过: {}", decoder.name());
        }
        available
      })
      .collect();

    Self { decoders }
  }

  /// 默认解码链：rxing（若启用）优先，rqrr 兜底
  pub fn default_chain() -> Self {
    let mut candidates: Vec<Box<dyn Decoder>> = Vec::new();
    #[cfg(feature = "rxing_decoder")]
    candidates.push(Box::new(RxingDecoder::default()));
    candidates.push(Box::new(RqrrDecoder::default()));
    Self::probe(candidates)
  }

  pub fn len(&self) -> usize {
    self.decoders.len()
  }

  pub fn is_empty(&self) -> bool {
    self.decoders.is_empty()
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.decoders.iter().map(|decoder| decoder.name()).collect()
  }

  /// 在同一缓冲区上依次尝试各解码器，返回第一个非空结果
  pub fn decode(&self, buffer: &PreparedBuffer) -> Option<DecodeHit> {
    for decoder in &self.decoders {
      let name = decoder.name();
      match catch_unwind(AssertUnwindSafe(|| decoder.try_decode(buffer))) {
        Ok(Ok(Some(payload))) if !payload.is_empty() => {
          debug!("{} 命中，载荷长度 {}", name, payload.len());
          return Some(DecodeHit {
            payload,
            decoder: name,
          });
        }
        Ok(Ok(_)) => trace!("{} 未命中", name),
        Ok(Err(e)) => debug!("{} 尝试失败: {}", name, e),
        Err(_) => warn!("{} 解码时发生 panic，视为未命中", name),
      }
    }
    None
  }
}

mod rqrr_decoder;
pub use self::rqrr_decoder::RqrrDecoder;

#[cfg(feature = "rxing_decoder")]
mod rxing_decoder;
#[cfg(feature = "rxing_decoder")]
pub use self::rxing_decoder::RxingDecoder;
