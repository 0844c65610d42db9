// 该文件是 Saoma （扫码） 项目的一部分。
// src/session.rs - 扫码会话
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

//! # 扫码会话
//!
//! 会话持有扫描序号、当前输入源与外部协作方，串联
//! 输入 → 搜索 → 载荷规范化 → 核验。
//!
//! 每次新输入（新图片、重开摄像头）都会推进序号；所有异步步骤携带开始时的
//! [`ScanToken`]，被取代的扫描返回 `None`，其结果不会被观察到。

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  cancel::{ScanSequence, ScanToken},
  frame::Frame,
  input::{ImageSource, InputError, InputSource, create_input_source},
  payload::{DocumentPayload, PayloadError, looks_like_document, normalize},
  preprocess::DEFAULT_LONG_SIDE_MAX,
  sweep::{SweepDepth, SweepHit, SweepOutcome, Sweeper},
  verify::{CollaboratorError, OcrFallback, Verdict, VerificationRequest, Verifier},
};

/// 输入源未声明帧率时的拉帧频率
const DEFAULT_LIVE_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum ScanError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("会话没有可用的输入源")]
  NoSource,
}

/// 一次扫描的最终结果
#[derive(Debug)]
pub enum ScanOutcome {
  /// 解码并规范化为证件记录；未配置核验服务时 `verdict` 为空
  Decoded {
    hit: SweepHit,
    payload: DocumentPayload,
    verdict: Option<Verdict>,
  },
  /// 解码成功，但内容不是证件载荷
  Unrecognized { hit: SweepHit, ocr: Option<Verdict> },
  /// 所有候选均未命中
  NotFound { ocr: Option<Verdict> },
  /// 看似证件载荷但无法解析
  Malformed { raw: String, reason: PayloadError },
  /// 核验或 OCR 服务调用失败
  VerificationFailed {
    payload: Option<DocumentPayload>,
    error: CollaboratorError,
  },
}

impl ScanOutcome {
  pub fn is_not_found(&self) -> bool {
    matches!(self, ScanOutcome::NotFound { .. })
  }

  /// 命中时解码得到的原始文本
  pub fn raw_text(&self) -> Option<&str> {
    match self {
      ScanOutcome::Decoded { hit, .. } | ScanOutcome::Unrecognized { hit, .. } => {
        Some(&hit.payload)
      }
      ScanOutcome::Malformed { raw, .. } => Some(raw),
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
  /// 提交给协作方的用户标识
  pub user_id: String,
  /// 实时帧的搜索深度
  pub live_depth: SweepDepth,
  /// 静态图片的搜索深度
  pub still_depth: SweepDepth,
  /// 未找到证件载荷时是否提交 OCR 回退（仅静态图片）
  pub ocr_fallback: bool,
  /// 静态图片工作帧的长边上限
  pub max_long_side: u32,
  /// 实时扫描最多处理的帧数
  pub live_frame_limit: Option<u64>,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      user_id: String::new(),
      live_depth: SweepDepth::FullFrame,
      still_depth: SweepDepth::Exhaustive,
      ocr_fallback: true,
      max_long_side: DEFAULT_LONG_SIDE_MAX,
      live_frame_limit: None,
    }
  }
}

pub struct ScanSession {
  sequence: ScanSequence,
  sweeper: Sweeper,
  source: Mutex<Option<Box<dyn InputSource>>>,
  verifier: Option<Arc<dyn Verifier>>,
  ocr: Option<Arc<dyn OcrFallback>>,
  config: SessionConfig,
}

impl ScanSession {
  pub fn new(sweeper: Sweeper, config: SessionConfig) -> Self {
    info!("扫码会话已创建，解码链: {:?}", sweeper.chain().names());
    Self {
      sequence: ScanSequence::new(),
      sweeper,
      source: Mutex::new(None),
      verifier: None,
      ocr: None,
      config,
    }
  }

  pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
    self.verifier = Some(verifier);
    self
  }

  pub fn with_ocr_fallback(mut self, ocr: Arc<dyn OcrFallback>) -> Self {
    self.ocr = Some(ocr);
    self
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  pub fn sweeper(&self) -> &Sweeper {
    &self.sweeper
  }

  /// 当前扫描序号
  pub fn current_seq(&self) -> u64 {
    self.sequence.current()
  }

  /// 使所有在途扫描过期
  pub fn supersede(&self) -> ScanToken {
    self.sequence.advance()
  }

  fn source_slot(&self) -> MutexGuard<'_, Option<Box<dyn InputSource>>> {
    self.source.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 替换输入源，旧输入源在此处释放
  pub fn replace_source(&self, source: Box<dyn InputSource>) -> ScanToken {
    let token = self.sequence.advance();
    let previous = self.source_slot().replace(source);
    drop(previous);
    token
  }

  /// 按 URL 打开输入源；打开失败时旧输入源同样被关闭
  pub fn open_source(&self, url: &Url) -> Result<ScanToken, ScanError> {
    self.close_source();
    let source = create_input_source(url)?;
    Ok(self.replace_source(source))
  }

  pub fn close_source(&self) {
    self.sequence.advance();
    if self.source_slot().take().is_some() {
      debug!("输入源已关闭");
    }
  }

  /// 解码图片字节并扫描
  pub async fn scan_image_bytes(&self, bytes: Vec<u8>) -> Result<Option<ScanOutcome>, ScanError> {
    let token = self.sequence.advance();
    let source = ImageSource::from_bytes(bytes, self.config.max_long_side)?;
    self.scan_still_with(source, token).await
  }

  /// 扫描一张静态图片，完整执行整帧与区域搜索
  pub async fn scan_still(&self, source: ImageSource) -> Result<Option<ScanOutcome>, ScanError> {
    let token = self.sequence.advance();
    self.scan_still_with(source, token).await
  }

  async fn scan_still_with(
    &self,
    mut source: ImageSource,
    token: ScanToken,
  ) -> Result<Option<ScanOutcome>, ScanError> {
    let Some(frame) = source.next().transpose()? else {
      return Ok(token.commit(ScanOutcome::NotFound { ocr: None }));
    };

    let report = self
      .sweeper
      .sweep(&frame.image, self.config.still_depth, &token)
      .await;
    debug!(
      "静态图片搜索结束: 整帧 {} 次, 区域 {} 次",
      report.full_frame_attempts, report.region_attempts
    );

    let outcome = match report.outcome {
      SweepOutcome::Cancelled => None,
      SweepOutcome::Hit(hit) => self.handle_hit(hit, &token, Some(source.bytes())).await,
      SweepOutcome::Exhausted => self.not_found(&token, Some(source.bytes())).await,
    };
    Ok(outcome)
  }

  /// 处理一帧实时画面，只做配置的实时搜索深度，不触发 OCR
  pub async fn scan_frame(&self, frame: &Frame, token: &ScanToken) -> Option<ScanOutcome> {
    let report = self
      .sweeper
      .sweep(&frame.image, self.config.live_depth, token)
      .await;
    match report.outcome {
      SweepOutcome::Cancelled => None,
      SweepOutcome::Hit(hit) => self.handle_hit(hit, token, None).await,
      SweepOutcome::Exhausted => token.commit(ScanOutcome::NotFound { ocr: None }),
    }
  }

  /// 以输入源帧率拉帧扫描，直到命中、输入结束、达到帧数上限、
  /// `stop` 返回 true 或会话被取代
  pub async fn run_live(
    &self,
    mut stop: impl FnMut() -> bool,
  ) -> Result<Option<ScanOutcome>, ScanError> {
    let token = self.sequence.token();
    let fps = self
      .source_slot()
      .as_ref()
      .ok_or(ScanError::NoSource)?
      .fps()
      .filter(|fps| *fps > 0.0)
      .unwrap_or(DEFAULT_LIVE_FPS);

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("开始实时扫描 @ {:.1} fps (序号 {})", fps, token.seq());

    let mut frames = 0u64;
    loop {
      tokio::select! {
        biased;
        _ = token.superseded() => return Ok(None),
        _ = ticker.tick() => {}
      }

      if stop() {
        info!("实时扫描被中止");
        self.supersede();
        return Ok(None);
      }

      let next = {
        let mut slot = self.source_slot();
        let Some(source) = slot.as_mut() else {
          return Err(ScanError::NoSource);
        };
        source.next()
      };
      let Some(frame) = next.transpose()? else {
        info!("输入源已结束，共 {} 帧", frames);
        return Ok(token.commit(ScanOutcome::NotFound { ocr: None }));
      };
      frames += 1;

      match self.scan_frame(&frame, &token).await {
        None => return Ok(None),
        Some(outcome) if outcome.is_not_found() => {}
        Some(outcome) => {
          info!("第 {} 帧命中", frame.index);
          return Ok(Some(outcome));
        }
      }

      if self.config.live_frame_limit.is_some_and(|limit| frames >= limit) {
        info!("达到帧数上限 {}", frames);
        return Ok(token.commit(ScanOutcome::NotFound { ocr: None }));
      }
    }
  }

  async fn handle_hit(
    &self,
    hit: SweepHit,
    token: &ScanToken,
    image: Option<&[u8]>,
  ) -> Option<ScanOutcome> {
    if !looks_like_document(&hit.payload) {
      debug!("解码内容不是证件载荷");
      return match self.run_ocr(token, image).await? {
        Ok(ocr) => Some(ScanOutcome::Unrecognized { hit, ocr }),
        Err(error) => Some(ScanOutcome::VerificationFailed {
          payload: None,
          error,
        }),
      };
    }

    let payload = match normalize(&hit.payload) {
      Ok(payload) => payload,
      Err(reason) => {
        warn!("证件载荷无法解析: {}", reason);
        return token.commit(ScanOutcome::Malformed {
          raw: hit.payload,
          reason,
        });
      }
    };

    let Some(verifier) = &self.verifier else {
      return token.commit(ScanOutcome::Decoded {
        hit,
        payload,
        verdict: None,
      });
    };

    let request = VerificationRequest::new(&self.config.user_id, &payload);
    match race(token, verifier.verify(&request)).await? {
      Ok(verdict) => {
        info!("核验完成: {:?}", verdict.status);
        Some(ScanOutcome::Decoded {
          hit,
          payload,
          verdict: Some(verdict),
        })
      }
      Err(error) => {
        warn!("核验失败: {}", error);
        Some(ScanOutcome::VerificationFailed {
          payload: Some(payload),
          error,
        })
      }
    }
  }

  async fn not_found(&self, token: &ScanToken, image: Option<&[u8]>) -> Option<ScanOutcome> {
    match self.run_ocr(token, image).await? {
      Ok(ocr) => Some(ScanOutcome::NotFound { ocr }),
      Err(error) => Some(ScanOutcome::VerificationFailed {
        payload: None,
        error,
      }),
    }
  }

  /// 外层 `None` 表示已被取代；未配置 OCR 或没有原始图像时返回 `Ok(None)`
  async fn run_ocr(
    &self,
    token: &ScanToken,
    image: Option<&[u8]>,
  ) -> Option<Result<Option<Verdict>, CollaboratorError>> {
    let ocr = self.ocr.as_ref().filter(|_| self.config.ocr_fallback);
    let (Some(ocr), Some(bytes)) = (ocr, image) else {
      return token.commit(Ok(None));
    };
    info!("未得到证件载荷，提交 OCR 回退 ({} 字节)", bytes.len());
    race(token, ocr.recognize(&self.config.user_id, bytes))
      .await
      .map(|result| result.map(Some))
  }
}

/// 等待 `fut`，期间令牌被取代则放弃
async fn race<T>(token: &ScanToken, fut: impl Future<Output = T>) -> Option<T> {
  tokio::select! {
    biased;
    _ = token.superseded() => {
      debug!("令牌 {} 在等待协作方时被取代", token.seq());
      None
    }
    value = fut => token.commit(value),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decoder::{Decoder, DecoderChain, DecoderError},
    input::InputSourceType,
    preprocess::PreparedBuffer,
    sweep::{SweepConfig, SweepStage},
    verify::{MockOcrFallback, MockVerifier, VerificationStatus},
  };
  use async_trait::async_trait;
  use image::{ImageFormat, RgbImage};
  use std::io::Cursor;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const DOCUMENT: &str = r#"{"DateIssued": "11 November 2025", "subject": {"fName": "juan", "lName": "cruz", "PCN": "1234-5678", "DOB": "November 11, 1990"}}"#;

  /// 第 `hit_on` 次调用（从 0 计）起返回固定文本
  struct Scripted {
    calls: Arc<AtomicUsize>,
    hit_on: Option<usize>,
    text: &'static str,
  }

  impl Decoder for Scripted {
    fn name(&self) -> &'static str {
      "scripted"
    }

    fn try_decode(&self, _buffer: &PreparedBuffer) -> Result<Option<String>, DecoderError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(self
        .hit_on
        .filter(|hit_on| call >= *hit_on)
        .map(|_| self.text.to_string()))
    }
  }

  fn session(hit_on: Option<usize>, text: &'static str) -> (ScanSession, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = DecoderChain::probe(vec![Box::new(Scripted {
      calls: calls.clone(),
      hit_on,
      text,
    })]);
    let config = SessionConfig {
      user_id: "user-1".to_string(),
      ..SessionConfig::default()
    };
    (
      ScanSession::new(Sweeper::new(chain, SweepConfig::default()), config),
      calls,
    )
  }

  fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::new(48, 32)
      .write_to(&mut out, ImageFormat::Png)
      .unwrap();
    out.into_inner()
  }

  fn still() -> ImageSource {
    ImageSource::from_bytes(png_bytes(), DEFAULT_LONG_SIDE_MAX).unwrap()
  }

  fn verdict(status: VerificationStatus) -> Verdict {
    Verdict {
      success: true,
      status: Some(status),
      message: None,
      record: None,
    }
  }

  struct Frames {
    frames: std::vec::IntoIter<Frame>,
  }

  impl Frames {
    fn boxed(count: u64) -> Box<dyn InputSource> {
      let frames: Vec<_> = (0..count)
        .map(|index| Frame {
          image: RgbImage::new(32, 32),
          index,
          timestamp_ms: index,
        })
        .collect();
      Box::new(Self {
        frames: frames.into_iter(),
      })
    }
  }

  impl Iterator for Frames {
    type Item = Result<Frame, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
      self.frames.next().map(Ok)
    }
  }

  impl InputSource for Frames {
    fn source_type(&self) -> InputSourceType {
      InputSourceType::V4l2
    }

    fn width(&self) -> u32 {
      32
    }

    fn height(&self) -> u32 {
      32
    }

    fn fps(&self) -> Option<f64> {
      Some(1000.0)
    }
  }

  struct HangingVerifier;

  #[async_trait]
  impl Verifier for HangingVerifier {
    async fn verify(&self, _request: &VerificationRequest) -> Result<Verdict, CollaboratorError> {
      std::future::pending().await
    }
  }

  #[tokio::test]
  async fn document_hit_is_verified() {
    let (session, _) = session(Some(0), DOCUMENT);
    let mut verifier = MockVerifier::new();
    verifier
      .expect_verify()
      .times(1)
      .withf(|request| {
        request.user_id == "user-1"
          && request.first_name == "JUAN"
          && request.pcn == "12345678"
          && request.date_issued == "2025-11-11"
      })
      .returning(|_| Ok(verdict(VerificationStatus::Authentic)));
    let session = session.with_verifier(Arc::new(verifier));

    let outcome = session.scan_still(still()).await.unwrap().unwrap();
    match outcome {
      ScanOutcome::Decoded {
        hit,
        payload,
        verdict,
      } => {
        assert_eq!(hit.stage, SweepStage::FullFrame);
        assert_eq!(payload.date_of_birth, "1990-11-11");
        assert!(verdict.unwrap().is_authentic());
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn exhausted_still_falls_back_to_ocr() {
    let (session, calls) = session(None, "");
    let mut ocr = MockOcrFallback::new();
    ocr
      .expect_recognize()
      .times(1)
      .withf(|user_id, image| user_id.to_string() == "user-1" && !image.is_empty())
      .returning(|_, _| Ok(verdict(VerificationStatus::Fake)));
    let session = session.with_ocr_fallback(Arc::new(ocr));

    let outcome = session.scan_still(still()).await.unwrap().unwrap();
    match outcome {
      ScanOutcome::NotFound { ocr } => {
        assert_eq!(ocr.unwrap().status, Some(VerificationStatus::Fake));
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 42);
  }

  #[tokio::test]
  async fn malformed_document_is_not_not_found() {
    let (session, _) = session(Some(0), "PSA|not-json");
    let outcome = session.scan_still(still()).await.unwrap().unwrap();
    match outcome {
      ScanOutcome::Malformed { raw, reason } => {
        assert_eq!(raw, "PSA|not-json");
        assert!(matches!(reason, PayloadError::Malformed(_)));
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn plain_text_is_unrecognized() {
    let (session, _) = session(Some(0), "https://example.com");
    let outcome = session.scan_still(still()).await.unwrap().unwrap();
    assert!(matches!(outcome, ScanOutcome::Unrecognized { ocr: None, .. }));
    assert_eq!(outcome.raw_text(), Some("https://example.com"));
  }

  #[tokio::test]
  async fn verifier_failure_is_reported() {
    let (session, _) = session(Some(0), DOCUMENT);
    let mut verifier = MockVerifier::new();
    verifier.expect_verify().returning(|_| {
      Err(CollaboratorError::Status {
        status: 502,
        body: "bad gateway".to_string(),
      })
    });
    let session = session.with_verifier(Arc::new(verifier));

    let outcome = session.scan_still(still()).await.unwrap().unwrap();
    assert!(matches!(
      outcome,
      ScanOutcome::VerificationFailed {
        payload: Some(_),
        error: CollaboratorError::Status { status: 502, .. },
      }
    ));
  }

  #[tokio::test]
  async fn undecodable_bytes_are_fatal() {
    let (session, _) = session(Some(0), DOCUMENT);
    let result = session.scan_image_bytes(b"nope".to_vec()).await;
    assert!(matches!(
      result,
      Err(ScanError::Input(InputError::ImageDecode(_)))
    ));
  }

  #[tokio::test]
  async fn newer_scan_supersedes_older() {
    let (session, _) = session(None, "");

    let mut older = Box::pin(session.scan_still(still()));
    assert!(futures::poll!(&mut older).is_pending());

    let newer = session.scan_image_bytes(png_bytes()).await.unwrap();
    assert!(matches!(newer, Some(ScanOutcome::NotFound { ocr: None })));
    assert!(older.await.unwrap().is_none());
  }

  #[tokio::test]
  async fn supersede_during_verification_discards_result() {
    let (session, _) = session(Some(0), DOCUMENT);
    let session = session.with_verifier(Arc::new(HangingVerifier));

    let mut scan = Box::pin(session.scan_still(still()));
    assert!(futures::poll!(&mut scan).is_pending());

    session.supersede();
    assert!(scan.await.unwrap().is_none());
  }

  #[tokio::test]
  async fn live_scan_stops_at_first_hit() {
    // 实时帧只做整帧 0°/90° 两次尝试，第 5 次调用落在第 3 帧
    let (session, calls) = session(Some(4), "hello");
    session.replace_source(Frames::boxed(10));

    let outcome = session.run_live(|| false).await.unwrap().unwrap();
    match outcome {
      ScanOutcome::Unrecognized { hit, ocr } => {
        assert_eq!(hit.payload, "hello");
        assert!(ocr.is_none());
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
  }

  #[tokio::test]
  async fn live_scan_reports_not_found_when_source_ends() {
    let (session, calls) = session(None, "");
    session.replace_source(Frames::boxed(3));

    let outcome = session.run_live(|| false).await.unwrap().unwrap();
    assert!(outcome.is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 6);
  }

  #[tokio::test]
  async fn live_scan_honours_stop_and_missing_source() {
    let (session, _) = session(None, "");
    assert!(matches!(
      session.run_live(|| false).await,
      Err(ScanError::NoSource)
    ));

    session.replace_source(Frames::boxed(10));
    let before = session.current_seq();
    assert!(session.run_live(|| true).await.unwrap().is_none());
    assert!(session.current_seq() > before);
  }
}
