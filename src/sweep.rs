// 该文件是 Saoma （扫码） 项目的一部分。
// src/sweep.rs - 分阶段扫码搜索
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

//! # 分阶段搜索
//!
//! 每次扫描按 `FullFrame → RegionSweep → Exhausted` 推进：
//!
//! - **FullFrame**：在限制分辨率后的整帧上以 0°（可选再加 90°）尝试一次解码链。
//!   大多数码都是正放且居中的，先付出这点代价可以免去昂贵的区域搜索。
//! - **RegionSweep**：按固定顺序遍历区域 × 旋转 × 缩放，首个命中即返回。
//!   候选总数上限为 `|regions| × |rotations| × |scales|`。
//! - **Exhausted**：全部候选未命中。
//!
//! 相邻两次尝试之间都会 `yield_now`，调用方的调度器因此最多被阻塞一次尝试的时长；
//! 每次尝试前与提交命中前都会检查 [`ScanToken`]。

use image::RgbImage;
use tracing::{debug, info, trace};

use crate::{
  cancel::ScanToken,
  decoder::{DecodeHit, DecoderChain},
  frame::{Region, Rotation, Scale, SweepCandidate},
  preprocess::{
    DEFAULT_CONTRAST_GAIN, DEFAULT_LONG_SIDE_MAX, PreparedBuffer, Preprocessor, cap_long_side,
  },
};

/// 默认区域：偏向四角与中心、彼此重叠
pub const DEFAULT_REGIONS: [Region; 5] = [
  Region::raw(0.00, 0.00, 0.65, 0.65), // 左上（大）
  Region::raw(0.15, 0.15, 0.70, 0.70), // 中心（大）
  Region::raw(0.25, 0.25, 0.50, 0.50), // 中心（紧）
  Region::raw(0.00, 0.50, 0.50, 0.50), // 左下
  Region::raw(0.50, 0.00, 0.50, 0.50), // 右上
];

pub const DEFAULT_SCALES: [Scale; 2] = [Scale::X1, Scale::X2];

/// 搜索深度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepDepth {
  /// 只做整帧尝试（实时帧的默认值）
  FullFrame,
  /// 整帧失败后继续区域搜索
  #[default]
  Exhaustive,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
  pub regions: Vec<Region>,
  pub rotations: Vec<Rotation>,
  pub scales: Vec<Scale>,
  /// 整帧阶段是否额外尝试 90°
  pub full_frame_quarter_turn: bool,
  /// 区域搜索是否启用灰度对比度增强
  pub enhance_regions: bool,
  pub long_side_max: u32,
  pub contrast_gain: f32,
}

impl Default for SweepConfig {
  fn default() -> Self {
    Self {
      regions: DEFAULT_REGIONS.to_vec(),
      rotations: Rotation::ALL.to_vec(),
      scales: DEFAULT_SCALES.to_vec(),
      full_frame_quarter_turn: true,
      enhance_regions: true,
      long_side_max: DEFAULT_LONG_SIDE_MAX,
      contrast_gain: DEFAULT_CONTRAST_GAIN,
    }
  }
}

impl SweepConfig {
  /// 区域搜索阶段的候选上限
  pub fn candidate_budget(&self) -> usize {
    self.regions.len() * self.rotations.len() * self.scales.len()
  }

  /// 按优先级顺序枚举区域候选：区域最外层，其次旋转，最后缩放
  pub fn region_candidates(&self) -> impl Iterator<Item = SweepCandidate> + '_ {
    self.regions.iter().flat_map(move |&region| {
      self.rotations.iter().flat_map(move |&rotation| {
        self
          .scales
          .iter()
          .map(move |&scale| SweepCandidate::new(region, rotation, scale))
      })
    })
  }

  fn full_frame_rotations(&self) -> &'static [Rotation] {
    if self.full_frame_quarter_turn {
      &[Rotation::Deg0, Rotation::Deg90]
    } else {
      &[Rotation::Deg0]
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStage {
  FullFrame,
  RegionSweep,
  Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepHit {
  pub payload: String,
  pub decoder: &'static str,
  pub stage: SweepStage,
  pub candidate: SweepCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
  Hit(SweepHit),
  Exhausted,
  /// 令牌已过期，结果不可观察
  Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
  pub outcome: SweepOutcome,
  pub full_frame_attempts: usize,
  pub region_attempts: usize,
}

impl SweepReport {
  fn new() -> Self {
    Self {
      outcome: SweepOutcome::Exhausted,
      full_frame_attempts: 0,
      region_attempts: 0,
    }
  }

  fn finish(mut self, outcome: SweepOutcome) -> Self {
    self.outcome = outcome;
    self
  }

  pub fn total_attempts(&self) -> usize {
    self.full_frame_attempts + self.region_attempts
  }
}

pub struct Sweeper {
  chain: DecoderChain,
  preprocessor: Preprocessor,
  config: SweepConfig,
}

impl Sweeper {
  pub fn new(chain: DecoderChain, config: SweepConfig) -> Self {
    Self {
      chain,
      preprocessor: Preprocessor::new(config.contrast_gain),
      config,
    }
  }

  pub fn chain(&self) -> &DecoderChain {
    &self.chain
  }

  pub fn config(&self) -> &SweepConfig {
    &self.config
  }

  pub async fn sweep(&self, image: &RgbImage, depth: SweepDepth, token: &ScanToken) -> SweepReport {
    let mut report = SweepReport::new();

    if image.width() == 0 || image.height() == 0 {
      debug!("空帧，跳过搜索");
      return report.finish(SweepOutcome::Exhausted);
    }

    let working = cap_long_side(image, self.config.long_side_max);
    // 所有候选共用一块工作缓冲区
    let mut buffer = PreparedBuffer::default();
    let mut first = true;

    debug!(
      "进入 FullFrame 阶段: {}x{} (序号 {})",
      working.width(),
      working.height(),
      token.seq()
    );
    for &rotation in self.config.full_frame_rotations() {
      if !self.pause(&mut first, token).await {
        return report.finish(SweepOutcome::Cancelled);
      }
      let candidate = SweepCandidate::full_frame(rotation);
      report.full_frame_attempts += 1;
      if let Some(hit) = self.attempt(&working, &candidate, false, &mut buffer) {
        return report.finish(commit(token, hit, SweepStage::FullFrame, candidate));
      }
    }

    if depth == SweepDepth::FullFrame {
      trace!("仅整帧搜索，未命中");
      return report.finish(SweepOutcome::Exhausted);
    }

    debug!(
      "进入 RegionSweep 阶段，候选上限 {}",
      self.config.candidate_budget()
    );
    for candidate in self.config.region_candidates() {
      if !self.pause(&mut first, token).await {
        return report.finish(SweepOutcome::Cancelled);
      }
      report.region_attempts += 1;
      trace!("候选 {}: {}", report.region_attempts, candidate);
      if let Some(hit) = self.attempt(
        &working,
        &candidate,
        self.config.enhance_regions,
        &mut buffer,
      ) {
        return report.finish(commit(token, hit, SweepStage::RegionSweep, candidate));
      }
    }

    info!(
      "搜索耗尽: 整帧 {} 次, 区域 {} 次",
      report.full_frame_attempts, report.region_attempts
    );
    report.finish(SweepOutcome::Exhausted)
  }

  /// 两次尝试之间让出调度，并检查令牌；返回 false 表示应当停止
  async fn pause(&self, first: &mut bool, token: &ScanToken) -> bool {
    if !std::mem::take(first) {
      tokio::task::yield_now().await;
    }
    if token.is_current() {
      true
    } else {
      debug!("令牌 {} 已过期，停止搜索", token.seq());
      false
    }
  }

  fn attempt(
    &self,
    image: &RgbImage,
    candidate: &SweepCandidate,
    enhance: bool,
    buffer: &mut PreparedBuffer,
  ) -> Option<DecodeHit> {
    if let Err(e) = self
      .preprocessor
      .prepare_into(image, candidate, enhance, buffer)
    {
      debug!("预处理失败 {}: {}", candidate, e);
      return None;
    }
    self.chain.decode(buffer)
  }
}

fn commit(
  token: &ScanToken,
  hit: DecodeHit,
  stage: SweepStage,
  candidate: SweepCandidate,
) -> SweepOutcome {
  match token.commit(hit) {
    Some(hit) => {
      info!("{:?} 阶段命中: {} ({})", stage, candidate, hit.decoder);
      SweepOutcome::Hit(SweepHit {
        payload: hit.payload,
        decoder: hit.decoder,
        stage,
        candidate,
      })
    }
    None => SweepOutcome::Cancelled,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    cancel::ScanSequence,
    decoder::{Decoder, DecoderError},
  };
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// 第 `hit_on` 次调用（从 0 计）时命中
  struct Counting {
    calls: Arc<AtomicUsize>,
    hit_on: Option<usize>,
  }

  impl Decoder for Counting {
    fn name(&self) -> &'static str {
      "counting"
    }

    fn try_decode(&self, _buffer: &PreparedBuffer) -> Result<Option<String>, DecoderError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      Ok((Some(call) == self.hit_on).then(|| format!("hit-{}", call)))
    }
  }

  fn sweeper(hit_on: Option<usize>) -> (Sweeper, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = DecoderChain::probe(vec![Box::new(Counting {
      calls: calls.clone(),
      hit_on,
    })]);
    (Sweeper::new(chain, SweepConfig::default()), calls)
  }

  #[test]
  fn default_budget_is_forty() {
    let config = SweepConfig::default();
    assert_eq!(config.candidate_budget(), 40);
    assert_eq!(config.region_candidates().count(), 40);
  }

  #[test]
  fn candidates_follow_priority_order() {
    let config = SweepConfig::default();
    let candidates: Vec<_> = config.region_candidates().take(3).collect();
    assert_eq!(
      candidates[0],
      SweepCandidate::new(DEFAULT_REGIONS[0], Rotation::Deg0, Scale::X1)
    );
    assert_eq!(
      candidates[1],
      SweepCandidate::new(DEFAULT_REGIONS[0], Rotation::Deg0, Scale::X2)
    );
    assert_eq!(
      candidates[2],
      SweepCandidate::new(DEFAULT_REGIONS[0], Rotation::Deg90, Scale::X1)
    );
    let last = config.region_candidates().last().unwrap();
    assert_eq!(
      last,
      SweepCandidate::new(DEFAULT_REGIONS[4], Rotation::Deg270, Scale::X2)
    );
  }

  #[tokio::test]
  async fn exhaustive_miss_tries_every_candidate() {
    let (sweeper, calls) = sweeper(None);
    let sequence = ScanSequence::new();
    let token = sequence.advance();

    let report = sweeper
      .sweep(&RgbImage::new(32, 24), SweepDepth::Exhaustive, &token)
      .await;

    assert_eq!(report.outcome, SweepOutcome::Exhausted);
    assert_eq!(report.full_frame_attempts, 2);
    assert_eq!(report.region_attempts, 40);
    assert_eq!(calls.load(Ordering::SeqCst), 42);
  }

  #[tokio::test]
  async fn full_frame_hit_skips_region_sweep() {
    let (sweeper, _calls) = sweeper(Some(0));
    let sequence = ScanSequence::new();
    let token = sequence.advance();

    let report = sweeper
      .sweep(&RgbImage::new(32, 24), SweepDepth::Exhaustive, &token)
      .await;

    match report.outcome {
      SweepOutcome::Hit(hit) => {
        assert_eq!(hit.payload, "hit-0");
        assert_eq!(hit.stage, SweepStage::FullFrame);
        assert_eq!(hit.candidate, SweepCandidate::full_frame(Rotation::Deg0));
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(report.region_attempts, 0);
  }

  #[tokio::test]
  async fn quarter_turn_is_tried_in_full_frame_stage() {
    let (sweeper, _calls) = sweeper(Some(1));
    let sequence = ScanSequence::new();
    let token = sequence.advance();

    let report = sweeper
      .sweep(&RgbImage::new(32, 24), SweepDepth::FullFrame, &token)
      .await;

    match report.outcome {
      SweepOutcome::Hit(hit) => {
        assert_eq!(hit.candidate.rotation, Rotation::Deg90);
        assert_eq!(hit.stage, SweepStage::FullFrame);
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn region_hit_stops_at_first_match() {
    // 调用 0、1 为整帧，第 2 + 6 次为第 7 个区域候选
    let (sweeper, calls) = sweeper(Some(8));
    let sequence = ScanSequence::new();
    let token = sequence.advance();

    let report = sweeper
      .sweep(&RgbImage::new(40, 40), SweepDepth::Exhaustive, &token)
      .await;

    match &report.outcome {
      SweepOutcome::Hit(hit) => {
        assert_eq!(hit.stage, SweepStage::RegionSweep);
        let expected = sweeper.config().region_candidates().nth(6).unwrap();
        assert_eq!(hit.candidate, expected);
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(report.region_attempts, 7);
    assert!(report.region_attempts <= sweeper.config().candidate_budget());
    assert_eq!(calls.load(Ordering::SeqCst), 9);
  }

  #[tokio::test]
  async fn full_frame_depth_never_sweeps_regions() {
    let (sweeper, calls) = sweeper(None);
    let sequence = ScanSequence::new();
    let token = sequence.advance();

    let report = sweeper
      .sweep(&RgbImage::new(32, 24), SweepDepth::FullFrame, &token)
      .await;

    assert_eq!(report.outcome, SweepOutcome::Exhausted);
    assert_eq!(report.region_attempts, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn stale_token_attempts_nothing() {
    let (sweeper, calls) = sweeper(Some(0));
    let sequence = ScanSequence::new();
    let stale = sequence.advance();
    let _fresh = sequence.advance();

    let report = sweeper
      .sweep(&RgbImage::new(32, 24), SweepDepth::Exhaustive, &stale)
      .await;

    assert_eq!(report.outcome, SweepOutcome::Cancelled);
    assert_eq!(report.total_attempts(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn sweep_yields_and_stops_when_superseded() {
    let (sweeper, calls) = sweeper(None);
    let sequence = ScanSequence::new();
    let token = sequence.advance();
    let image = RgbImage::new(32, 24);

    let mut sweep = Box::pin(sweeper.sweep(&image, SweepDepth::Exhaustive, &token));
    assert!(futures::poll!(&mut sweep).is_pending());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let _newer = sequence.advance();
    let report = sweep.await;

    assert_eq!(report.outcome, SweepOutcome::Cancelled);
    assert_eq!(report.full_frame_attempts, 1);
    assert_eq!(report.region_attempts, 0);
  }

  #[tokio::test]
  async fn empty_frame_is_not_swept() {
    let (sweeper, calls) = sweeper(Some(0));
    let sequence = ScanSequence::new();
    let token = sequence.advance();

    let report = sweeper
      .sweep(&RgbImage::new(0, 0), SweepDepth::Exhaustive, &token)
      .await;

    assert_eq!(report.outcome, SweepOutcome::Exhausted);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
