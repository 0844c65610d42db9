// 该文件是 Saoma （扫码） 项目的一部分。
// src/verify.rs - 证件核验与 OCR 回退接口
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

//! 外部协作方的请求/响应类型与 trait 接缝。
//!
//! 核验服务与 OCR 服务对本库而言是不透明的能力：会话只通过
//! [`Verifier`] 与 [`OcrFallback`] 调用它们，失败一律上报、不重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::DocumentPayload;

#[derive(Error, Debug)]
pub enum CollaboratorError {
  #[cfg(feature = "http_client")]
  #[error("请求发送失败: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("服务返回错误状态 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("响应解析失败: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("无效的服务地址: {0}")]
  InvalidUrl(String),
}

/// 核验请求体，字段名与服务端约定一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRequest {
  #[serde(rename = "userId")]
  pub user_id: String,
  #[serde(rename = "d")]
  pub date_issued: String,
  #[serde(rename = "dob")]
  pub date_of_birth: String,
  pub pcn: String,
  #[serde(rename = "pob")]
  pub place_of_birth: String,
  #[serde(rename = "fn")]
  pub first_name: String,
  #[serde(rename = "ln")]
  pub last_name: String,
  #[serde(rename = "mn")]
  pub middle_name: String,
  #[serde(rename = "s")]
  pub sex: String,
  #[serde(rename = "sf")]
  pub suffix: String,
}

impl VerificationRequest {
  pub fn new(user_id: impl Into<String>, payload: &DocumentPayload) -> Self {
    Self {
      user_id: user_id.into(),
      date_issued: payload.date_issued.clone(),
      date_of_birth: payload.date_of_birth.clone(),
      pcn: payload.pcn.clone(),
      place_of_birth: payload.place_of_birth.clone(),
      first_name: payload.first_name.clone(),
      last_name: payload.last_name.clone(),
      middle_name: payload.middle_name.clone(),
      sex: payload.sex.clone(),
      suffix: payload.suffix.clone(),
    }
  }
}

/// 服务端统一响应信封
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
  #[serde(default)]
  pub success: bool,
  pub data: Option<T>,
  pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
  Authentic,
  Fake,
  Error,
}

/// 服务端保存的核验记录
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerificationRecord {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "type", default)]
  pub kind: Option<String>,
  pub status: VerificationStatus,
  /// 证件字段，原样保留
  #[serde(default)]
  pub data: serde_json::Value,
}

/// 核验结论
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
  pub success: bool,
  pub status: Option<VerificationStatus>,
  pub message: Option<String>,
  pub record: Option<VerificationRecord>,
}

impl Verdict {
  pub fn is_authentic(&self) -> bool {
    self.success && self.status == Some(VerificationStatus::Authentic)
  }
}

impl From<ApiResponse<VerificationRecord>> for Verdict {
  fn from(response: ApiResponse<VerificationRecord>) -> Self {
    Self {
      success: response.success,
      status: response.data.as_ref().map(|record| record.status),
      message: response.message,
      record: response.data,
    }
  }
}

/// 解析响应体为 [`Verdict`]
pub fn parse_verdict(body: &str) -> Result<Verdict, CollaboratorError> {
  let response: ApiResponse<VerificationRecord> = serde_json::from_str(body)?;
  Ok(response.into())
}

/// 证件核验服务
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Verifier: Send + Sync {
  async fn verify(&self, request: &VerificationRequest) -> Result<Verdict, CollaboratorError>;
}

/// 扫码失败后的 OCR 回退，提交原始图像字节
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OcrFallback: Send + Sync {
  async fn recognize(&self, user_id: &str, image: &[u8]) -> Result<Verdict, CollaboratorError>;
}

#[cfg(feature = "http_client")]
mod http_client;
#[cfg(feature = "http_client")]
pub use self::http_client::HttpVerificationClient;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::payload::normalize;

  #[test]
  fn request_uses_wire_field_names() {
    let payload = normalize(
      r#"{"DateIssued": "2025-11-11", "subject": {"fName": "juan", "lName": "cruz", "PCN": "12-34"}}"#,
    )
    .unwrap();
    let request = VerificationRequest::new("42", &payload);
    let json = serde_json::to_value(&request).unwrap();

    assert_eq!(json["userId"], "42");
    assert_eq!(json["d"], "2025-11-11");
    assert_eq!(json["fn"], "JUAN");
    assert_eq!(json["ln"], "CRUZ");
    assert_eq!(json["mn"], "");
    assert_eq!(json["pcn"], "1234");
    assert_eq!(json["s"], "string");
    assert_eq!(json["sf"], "Male");
    assert_eq!(json.as_object().unwrap().len(), 10);
  }

  #[test]
  fn verdict_reads_envelope() {
    let verdict = parse_verdict(
      r#"{"success": true, "data": {"id": "v1", "type": "PSA", "status": "AUTHENTIC", "data": {"firstName": "JUAN"}}}"#,
    )
    .unwrap();
    assert!(verdict.is_authentic());
    assert_eq!(verdict.record.unwrap().kind.as_deref(), Some("PSA"));

    let fake = parse_verdict(r#"{"success": true, "data": {"status": "FAKE"}}"#).unwrap();
    assert_eq!(fake.status, Some(VerificationStatus::Fake));
    assert!(!fake.is_authentic());

    let failed = parse_verdict(r#"{"success": false, "message": "Not found."}"#).unwrap();
    assert_eq!(failed.status, None);
    assert_eq!(failed.message.as_deref(), Some("Not found."));
  }

  #[test]
  fn garbage_body_is_a_decode_error() {
    assert!(matches!(
      parse_verdict("<html>"),
      Err(CollaboratorError::Decode(_))
    ));
  }
}
