// 该文件是 Saoma （扫码） 项目的一部分。
// src/bin/sweep_repeatshot.rs - 重复扫描同一张图片，统计搜索耗时
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use saoma::{
  decoder::DecoderChain,
  session::{ScanSession, SessionConfig},
  sweep::{SweepConfig, Sweeper},
  task::{RepeatShotTask, Task, log_outcome},
};
use tracing::info;

/// 重复扫描参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图片，例如 image:///path/to/file.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 重复次数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub times: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.times);

  let sweeper = Sweeper::new(DecoderChain::default_chain(), SweepConfig::default());
  let config = SessionConfig {
    ocr_fallback: false,
    ..SessionConfig::default()
  };
  let session = ScanSession::new(sweeper, config);

  let outcome = RepeatShotTask::default()
    .with_times(args.times)
    .run_task(&session, &args.input)
    .await?;
  log_outcome(outcome.as_ref());

  Ok(())
}
