// 该文件是 Saoma （扫码） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use saoma::{
  FromUrlWithScheme,
  decoder::DecoderChain,
  input::ImageSource,
  session::{ScanOutcome, ScanSession},
  sweep::Sweeper,
  task::{ContinuousTask, OneShotTask, Task, log_outcome},
};

fn build_session(args: &args::Args) -> Result<ScanSession> {
  let sweeper = Sweeper::new(DecoderChain::default_chain(), args.sweep_config());
  #[allow(unused_mut)]
  let mut session = ScanSession::new(sweeper, args.session_config());

  if let Some(url) = &args.verify_url {
    #[cfg(feature = "http_client")]
    {
      use saoma::{FromUrl, verify::HttpVerificationClient};
      use std::sync::Arc;

      let client = Arc::new(HttpVerificationClient::from_url(url)?);
      session = session
        .with_verifier(client.clone())
        .with_ocr_fallback(client);
    }
    #[cfg(not(feature = "http_client"))]
    tracing::warn!("未启用 http_client 特性，忽略核验服务地址: {}", url);
  }

  Ok(session)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Saoma 扫码");
  info!("输入来源: {}", args.input);
  if let Some(url) = &args.verify_url {
    info!("核验服务: {}", url);
  }

  let session = build_session(&args)?;

  let outcome = if args.input.scheme() == ImageSource::SCHEME {
    OneShotTask.run_task(&session, &args.input).await?
  } else {
    ContinuousTask::default()
      .with_frame_number(args.frame_limit())
      .run_task(&session, &args.input)
      .await?
  };

  log_outcome(outcome.as_ref());
  match &outcome {
    Some(ScanOutcome::Decoded { payload, .. }) => {
      println!("{}", serde_json::to_string_pretty(payload)?);
    }
    Some(ScanOutcome::Unrecognized { hit, .. }) => println!("{}", hit.payload),
    _ => {}
  }

  Ok(())
}
