// 该文件是 Saoma （扫码） 项目的一部分。
// src/payload/date.rs - 人类可读日期转 ISO 日期
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

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const MONTHS: [&str; 12] = [
  "january",
  "february",
  "march",
  "april",
  "may",
  "june",
  "july",
  "august",
  "september",
  "october",
  "november",
  "december",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d %Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// 将日期字符串规范化为 `YYYY-MM-DD`，无法解析时返回空串
///
/// 依次尝试 `D Month YYYY`、`Month D, YYYY`，最后是若干通用格式。
pub fn to_iso_date(input: &str) -> String {
  let s = input.trim();
  if s.is_empty() {
    return String::new();
  }

  day_month_year(s)
    .or_else(|| month_day_year(s))
    .or_else(|| generic(s))
    .map(|date| date.format("%Y-%m-%d").to_string())
    .unwrap_or_default()
}

/// 接受完整月份名或至少三个字母的前缀（大小写不敏感）
fn month_number(name: &str) -> Option<u32> {
  let name = name.trim_end_matches('.').to_ascii_lowercase();
  if name.len() < 3 {
    return None;
  }
  MONTHS
    .iter()
    .position(|month| month.starts_with(&name))
    .map(|idx| idx as u32 + 1)
}

fn day_number(token: &str) -> Option<u32> {
  let token = token.trim_end_matches(',');
  if token.is_empty() || token.len() > 2 {
    return None;
  }
  token.parse().ok()
}

fn year_number(token: &str) -> Option<i32> {
  if token.len() != 4 || !token.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  token.parse().ok()
}

// 11 November 2025
fn day_month_year(s: &str) -> Option<NaiveDate> {
  let mut parts = s.split_whitespace();
  let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
  if parts.next().is_some() {
    return None;
  }
  NaiveDate::from_ymd_opt(year_number(year)?, month_number(month)?, day_number(day)?)
}

// November 11, 2025 / November 11,2025
fn month_day_year(s: &str) -> Option<NaiveDate> {
  let (head, year) = s.rsplit_once(',')?;
  let mut parts = head.split_whitespace().chain(Some(year.trim()));
  let (month, day, year) = (parts.next()?, parts.next()?, parts.next()?);
  if parts.next().is_some() {
    return None;
  }
  NaiveDate::from_ymd_opt(year_number(year)?, month_number(month)?, day_number(day)?)
}

fn generic(s: &str) -> Option<NaiveDate> {
  if let Some(date) = DATE_FORMATS
    .iter()
    .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
  {
    return Some(date);
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.date_naive());
  }
  if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
    return Some(dt.date_naive());
  }
  DATETIME_FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|dt| dt.date())
}
