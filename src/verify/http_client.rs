// 该文件是 Saoma （扫码） 项目的一部分。
// src/verify/http_client.rs - 基于 HTTP 的核验与 OCR 客户端
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

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
  Client, Response,
  multipart::{Form, Part},
};
use tracing::{debug, info, warn};
use url::Url;

use super::{CollaboratorError, OcrFallback, Verdict, VerificationRequest, Verifier, parse_verdict};
use crate::FromUrl;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const VERIFY_PATH: &str = "verification/verify/psa";
const OCR_PATH: &str = "verification/verify/ocr";
const OCR_FILE_NAME: &str = "capture.jpg";

/// 同一服务根地址下的核验与 OCR 接口
pub struct HttpVerificationClient {
  client: Client,
  base: Url,
}

impl HttpVerificationClient {
  pub fn new(base: Url) -> Result<Self, CollaboratorError> {
    if !matches!(base.scheme(), "http" | "https") {
      return Err(CollaboratorError::InvalidUrl(base.to_string()));
    }
    let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
    info!("核验服务地址: {}", base);
    Ok(Self { client, base })
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  pub fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
  }

  async fn read_verdict(response: Response) -> Result<Verdict, CollaboratorError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
      warn!("核验服务返回 {}", status);
      return Err(CollaboratorError::Status {
        status: status.as_u16(),
        body,
      });
    }
    parse_verdict(&body)
  }
}

impl FromUrl for HttpVerificationClient {
  type Error = CollaboratorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Self::new(url.clone())
  }
}

#[async_trait]
impl Verifier for HttpVerificationClient {
  async fn verify(&self, request: &VerificationRequest) -> Result<Verdict, CollaboratorError> {
    let url = self.endpoint(VERIFY_PATH);
    debug!("提交核验请求: {}", url);
    let response = self.client.post(&url).json(request).send().await?;
    Self::read_verdict(response).await
  }
}

#[async_trait]
impl OcrFallback for HttpVerificationClient {
  async fn recognize(&self, user_id: &str, image: &[u8]) -> Result<Verdict, CollaboratorError> {
    let url = self.endpoint(OCR_PATH);
    let mime = image::guess_format(image)
      .map(|format| format.to_mime_type())
      .unwrap_or("application/octet-stream");
    debug!("提交 OCR 回退: {} ({} 字节, {})", url, image.len(), mime);

    let form = Form::new()
      .part(
        "image",
        Part::bytes(image.to_vec())
          .file_name(OCR_FILE_NAME)
          .mime_str(mime)?,
      )
      .text("userId", user_id.to_string());
    let response = self.client.post(&url).multipart(form).send().await?;
    Self::read_verdict(response).await
  }
}
