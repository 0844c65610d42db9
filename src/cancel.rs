// 该文件是 Saoma （扫码） 项目的一部分。
// src/cancel.rs - 扫描序号与取消令牌
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

//! 协作式取消：会话持有单调递增的序号，每个异步步骤携带开始时捕获的
//! [`ScanToken`]，在提交结果前检查序号是否仍为当前值。过期结果被静默丢弃。
//! 正在执行的单次解码不会被打断，只是其结果不再被观察到。

use tokio::sync::watch;
use tracing::debug;

/// 会话侧的序号持有者
#[derive(Debug)]
pub struct ScanSequence {
  tx: watch::Sender<u64>,
}

impl Default for ScanSequence {
  fn default() -> Self {
    Self::new()
  }
}

impl ScanSequence {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(0);
    Self { tx }
  }

  pub fn current(&self) -> u64 {
    *self.tx.borrow()
  }

  /// 新输入取代当前输入：序号加一并返回捕获新序号的令牌
  pub fn advance(&self) -> ScanToken {
    let mut next = 0;
    self.tx.send_modify(|seq| {
      *seq += 1;
      next = *seq;
    });
    debug!("扫描序号推进至 {}", next);
    ScanToken {
      seq: next,
      rx: self.tx.subscribe(),
    }
  }

  /// 捕获当前序号而不推进
  pub fn token(&self) -> ScanToken {
    let rx = self.tx.subscribe();
    let seq = *rx.borrow();
    ScanToken { seq, rx }
  }
}

impl Drop for ScanSequence {
  fn drop(&mut self) {
    // 会话关闭同样使所有在途令牌过期
    self.tx.send_modify(|seq| *seq += 1);
  }
}

/// 异步步骤开始时捕获的序号
#[derive(Debug, Clone)]
pub struct ScanToken {
  seq: u64,
  rx: watch::Receiver<u64>,
}

impl ScanToken {
  pub fn seq(&self) -> u64 {
    self.seq
  }

  pub fn is_current(&self) -> bool {
    *self.rx.borrow() == self.seq
  }

  /// 序号仍为当前值时放行结果，否则丢弃
  pub fn commit<T>(&self, value: T) -> Option<T> {
    if self.is_current() {
      Some(value)
    } else {
      debug!(
        "丢弃过期结果: 令牌序号 {}, 当前序号 {}",
        self.seq,
        *self.rx.borrow()
      );
      None
    }
  }

  /// 等待本令牌被取代（或会话关闭）
  pub async fn superseded(&self) {
    let seq = self.seq;
    let mut rx = self.rx.clone();
    let _ = rx.wait_for(|current| *current != seq).await;
  }
}
