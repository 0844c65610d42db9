// 该文件是 Saoma （扫码） 项目的一部分。
// src/payload.rs - 载荷解析与规范化
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

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

mod date;
pub use self::date::to_iso_date;

/// 载荷缺少性别字段时的占位值，沿用核验服务约定的字面量
pub const SEX_PLACEHOLDER: &str = "string";
/// 载荷缺少后缀字段时的占位值，沿用核验服务约定的字面量
pub const SUFFIX_PLACEHOLDER: &str = "Male";

/// 证件载荷中标记证件来源的字符串
const DOCUMENT_MARKER: &str = "PSA";

const DATE_ISSUED_KEYS: &[&str] = &["DateIssued", "dateIssued"];
const BIRTH_DATE_KEYS: &[&str] = &["DOB", "Dob", "BirthDate"];
const PCN_KEYS: &[&str] = &["PCN", "pcn"];
const BIRTH_PLACE_KEYS: &[&str] = &["POB", "pob"];
const FIRST_NAME_KEYS: &[&str] = &["fName", "firstName"];
const MIDDLE_NAME_KEYS: &[&str] = &["mName", "middleName"];
const LAST_NAME_KEYS: &[&str] = &["lName", "lastName"];
const SEX_KEYS: &[&str] = &["sex"];
const SUFFIX_KEYS: &[&str] = &["Suffix", "suffix"];

#[derive(Error, Debug)]
pub enum PayloadError {
  #[error("载荷不是合法 JSON: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("载荷不是 JSON 对象")]
  NotAnObject,
  #[error("载荷缺少 subject 对象")]
  MissingSubject,
}

/// 规范化后的证件记录，创建后不可修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentPayload {
  /// 签发日期，`YYYY-MM-DD` 或空串
  pub date_issued: String,
  /// 出生日期，`YYYY-MM-DD` 或空串
  pub date_of_birth: String,
  /// 证件号，仅保留数字
  pub pcn: String,
  pub place_of_birth: String,
  pub first_name: String,
  pub middle_name: String,
  pub last_name: String,
  /// 缺失时为 [`SEX_PLACEHOLDER`]
  pub sex: String,
  /// 缺失时为 [`SUFFIX_PLACEHOLDER`]
  pub suffix: String,
}

/// 将解码得到的文本解析为 [`DocumentPayload`]
pub fn normalize(raw: &str) -> Result<DocumentPayload, PayloadError> {
  let value: Value = serde_json::from_str(raw.trim())?;
  let root = value.as_object().ok_or(PayloadError::NotAnObject)?;
  let subject = ["subject", "Subject"]
    .iter()
    .find_map(|key| root.get(*key).and_then(Value::as_object))
    .ok_or(PayloadError::MissingSubject)?;

  let text = |keys: &[&str]| field(subject, keys).unwrap_or_default();
  let upper = |keys: &[&str]| text(keys).to_uppercase();

  let payload = DocumentPayload {
    // 签发日期位于顶层，其余字段位于 subject 内
    date_issued: to_iso_date(&field(root, DATE_ISSUED_KEYS).unwrap_or_default()),
    date_of_birth: to_iso_date(&text(BIRTH_DATE_KEYS)),
    pcn: digits_only(&text(PCN_KEYS)),
    place_of_birth: normalize_place(&text(BIRTH_PLACE_KEYS)),
    first_name: upper(FIRST_NAME_KEYS),
    middle_name: upper(MIDDLE_NAME_KEYS),
    last_name: upper(LAST_NAME_KEYS),
    sex: field(subject, SEX_KEYS).unwrap_or_else(|| SEX_PLACEHOLDER.to_string()),
    suffix: field(subject, SUFFIX_KEYS).unwrap_or_else(|| SUFFIX_PLACEHOLDER.to_string()),
  };
  debug!("载荷规范化完成: 证件号长度 {}", payload.pcn.len());
  Ok(payload)
}

/// 按顺序查找键，取第一个非空值；字符串与数字均可
fn field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|key| {
    let text = match object.get(*key)? {
      Value::String(s) => s.trim().to_string(),
      Value::Number(n) => n.to_string(),
      _ => return None,
    };
    (!text.is_empty()).then_some(text)
  })
}

/// 去除所有非数字字符
pub fn digits_only(input: &str) -> String {
  input.chars().filter(char::is_ascii_digit).collect()
}

/// 去除首尾空白，逗号两侧统一为 `", "`
pub fn normalize_place(input: &str) -> String {
  input
    .trim()
    .split(',')
    .map(str::trim)
    .collect::<Vec<_>>()
    .join(", ")
}

/// 廉价预判：文本是否像证件载荷
///
/// 含证件标记，或是带 `subject`/`Subject`/`subjects` 键的 JSON 对象。
pub fn looks_like_document(raw: &str) -> bool {
  if raw.contains(DOCUMENT_MARKER) {
    return true;
  }
  match serde_json::from_str::<Value>(raw.trim()) {
    Ok(Value::Object(map)) => ["subject", "Subject", "subjects"]
      .iter()
      .any(|key| map.contains_key(*key)),
    _ => false,
  }
}
