// 该文件是 Saoma （扫码） 项目的一部分。
// src/task.rs - 扫码任务驱动
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

use std::{thread, time::Duration, time::Instant};

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrlWithScheme,
  input::ImageSource,
  session::{ScanError, ScanOutcome, ScanSession},
  url_file_path,
};

#[async_trait(?Send)]
pub trait Task: Sized {
  type Error;
  async fn run_task(
    self,
    session: &ScanSession,
    input: &Url,
  ) -> Result<Option<ScanOutcome>, Self::Error>;
}

fn read_still(input: &Url) -> anyhow::Result<Vec<u8>> {
  if input.scheme() != ImageSource::SCHEME {
    anyhow::bail!("静态扫描需要 {}:// 输入: {}", ImageSource::SCHEME, input);
  }
  let path = url_file_path(input);
  std::fs::read(&path).with_context(|| format!("无法读取图片文件: {}", path))
}

/// 扫描一张静态图片
pub struct OneShotTask;

#[async_trait(?Send)]
impl Task for OneShotTask {
  type Error = anyhow::Error;

  async fn run_task(
    self,
    session: &ScanSession,
    input: &Url,
  ) -> Result<Option<ScanOutcome>, Self::Error> {
    info!("开始任务...");
    let bytes = read_still(input)?;
    info!("图片读取成功，开始扫描...");
    let now = Instant::now();
    let outcome = session.scan_image_bytes(bytes).await?;
    info!("扫描完成，耗时: {:.2?}", now.elapsed());
    Ok(outcome)
  }
}

/// 对同一张图片重复扫描，统计平均耗时
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 100 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }
}

#[async_trait(?Send)]
impl Task for RepeatShotTask {
  type Error = anyhow::Error;

  async fn run_task(
    self,
    session: &ScanSession,
    input: &Url,
  ) -> Result<Option<ScanOutcome>, Self::Error> {
    info!("开始任务...");
    let bytes = read_still(input)?;
    info!("图片读取成功，开始重复扫描 {} 次...", self.times);

    let mut times = Vec::with_capacity(self.times);
    let mut last = None;
    for i in 0..self.times {
      let now = Instant::now();
      let source = ImageSource::from_bytes(bytes.clone(), session.config().max_long_side)?;
      last = session.scan_still(source).await?;
      let elapsed = now.elapsed();
      info!("({})扫描完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
    }

    // 前两次包含冷启动开销
    let warm: Vec<_> = times.iter().skip(2).collect();
    if !warm.is_empty() {
      warn!(
        "平均扫描时间: {:.2?}",
        warm.iter().copied().sum::<Duration>() / warm.len() as u32
      );
    }

    Ok(last)
  }
}

/// 从摄像头持续拉帧，直到命中、达到帧数或收到中断信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

#[async_trait(?Send)]
impl Task for ContinuousTask {
  type Error = anyhow::Error;

  async fn run_task(
    self,
    session: &ScanSession,
    input: &Url,
  ) -> Result<Option<ScanOutcome>, Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .expect("Error setting Ctrl-C handler");

    session
      .open_source(input)
      .with_context(|| format!("无法打开输入源: {}", input))?;

    let mut frame_index = 0usize;
    let frame_number = self.frame_number;
    let outcome = drive_live(session, || {
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        return true;
      }
      frame_index += 1;
      if frame_number.is_some_and(|n| frame_index > n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index - 1);
        return true;
      }
      false
    })
    .await?;

    info!("任务完成，退出");
    Ok(outcome)
  }
}

/// 运行实时扫描，无论成败都关闭输入源
async fn drive_live(
  session: &ScanSession,
  stop: impl FnMut() -> bool,
) -> Result<Option<ScanOutcome>, ScanError> {
  let outcome = session.run_live(stop).await;
  session.close_source();
  outcome
}

/// 将扫描结果写入日志，返回是否得到了可用载荷
pub fn log_outcome(outcome: Option<&ScanOutcome>) -> bool {
  let Some(outcome) = outcome else {
    warn!("扫描已被取代，没有结果");
    return false;
  };

  match outcome {
    ScanOutcome::Decoded {
      hit,
      payload,
      verdict,
    } => {
      info!(
        "识别到证件载荷 ({}, {:?} {})",
        hit.decoder, hit.stage, hit.candidate
      );
      info!("姓名: {} {} {}", payload.first_name, payload.middle_name, payload.last_name);
      match verdict {
        Some(verdict) if verdict.is_authentic() => info!("核验通过"),
        Some(verdict) => warn!(
          "核验未通过: {:?} {}",
          verdict.status,
          verdict.message.as_deref().unwrap_or("")
        ),
        None => info!("未配置核验服务"),
      }
      true
    }
    ScanOutcome::Unrecognized { hit, ocr } => {
      info!("解码内容: {}", hit.payload);
      if let Some(ocr) = ocr {
        info!("OCR 回退结果: {:?}", ocr.status);
      }
      true
    }
    ScanOutcome::NotFound { ocr } => {
      warn!("未找到二维码");
      if let Some(ocr) = ocr {
        info!("OCR 回退结果: {:?} {}", ocr.status, ocr.message.as_deref().unwrap_or(""));
      }
      false
    }
    ScanOutcome::Malformed { raw, reason } => {
      warn!("证件载荷格式错误 ({}): {}", reason, raw);
      false
    }
    ScanOutcome::VerificationFailed { error, .. } => {
      warn!("协作服务调用失败: {}", error);
      false
    }
  }
}
