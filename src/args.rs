// 该文件是 Saoma （扫码） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, ValueEnum};
use url::Url;

use saoma::{
  preprocess::DEFAULT_LONG_SIDE_MAX,
  session::SessionConfig,
  sweep::{SweepConfig, SweepDepth},
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
  /// 只尝试整帧
  Full,
  /// 整帧失败后继续区域搜索
  Exhaustive,
}

impl From<Depth> for SweepDepth {
  fn from(depth: Depth) -> Self {
    match depth {
      Depth::Full => SweepDepth::FullFrame,
      Depth::Exhaustive => SweepDepth::Exhaustive,
    }
  }
}

/// Saoma 扫码参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/to/file.jpg
  /// - 摄像头: v4l:///dev/video0
  #[arg(long, env = "SAOMA_INPUT", value_name = "SOURCE")]
  pub input: Url,

  /// 核验服务根地址，未设置时只解码不核验
  #[arg(long, env = "SAOMA_VERIFY_URL", value_name = "URL")]
  pub verify_url: Option<Url>,

  /// 提交给核验服务的用户标识
  #[arg(long, env = "SAOMA_USER_ID", default_value = "", value_name = "ID")]
  pub user_id: String,

  /// 工作分辨率的长边上限
  #[arg(long, default_value_t = DEFAULT_LONG_SIDE_MAX, value_name = "PIXELS")]
  pub max_long_side: u32,

  /// 实时帧的搜索深度
  #[arg(long, value_enum, default_value = "full")]
  pub live_depth: Depth,

  /// 整帧阶段不尝试 90° 旋转
  #[arg(long)]
  pub no_quarter_turn: bool,

  /// 扫码失败时不提交 OCR 回退
  #[arg(long)]
  pub no_ocr: bool,

  /// 最大处理帧数（仅对摄像头有效，0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,
}

impl Args {
  pub fn sweep_config(&self) -> SweepConfig {
    SweepConfig {
      full_frame_quarter_turn: !self.no_quarter_turn,
      long_side_max: self.max_long_side,
      ..SweepConfig::default()
    }
  }

  pub fn session_config(&self) -> SessionConfig {
    SessionConfig {
      user_id: self.user_id.clone(),
      live_depth: self.live_depth.into(),
      ocr_fallback: !self.no_ocr,
      max_long_side: self.max_long_side,
      ..SessionConfig::default()
    }
  }

  /// 摄像头任务的帧数上限，由任务驱动负责计数
  pub fn frame_limit(&self) -> Option<usize> {
    (self.max_frames > 0).then_some(self.max_frames as usize)
  }
}
