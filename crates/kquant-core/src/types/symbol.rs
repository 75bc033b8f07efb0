//! 종목 코드 및 시장 정의.
//!
//! 이 모듈은 한국 주식 종목 관련 타입을 정의합니다:
//! - `Market` - 소속 시장 (KOSPI/KOSDAQ)
//! - `Symbol` - 6자리 표준 종목 코드

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 소속 시장 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// 유가증권시장
    Kospi,
    /// 코스닥시장
    Kosdaq,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Kospi => write!(f, "KOSPI"),
            Market::Kosdaq => write!(f, "KOSDAQ"),
        }
    }
}

/// 6자리 표준 종목 코드.
///
/// 어댑터가 수신하는 소스별 표기("005930.KS", "A005930" 등)는 모두
/// 6자리 코드로 정규화되어 시스템 내부를 흐릅니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// 소스별 표기를 6자리 표준 코드로 정규화합니다.
    ///
    /// 허용 입력:
    /// - `"005930"` - 이미 표준 코드
    /// - `"005930.KS"` / `"035720.KQ"` - 거래소 접미사 포함
    /// - `"A005930"` - 증권사 API 접두사 포함
    pub fn canonicalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();

        // 거래소 접미사 제거
        let without_suffix = trimmed
            .strip_suffix(".KS")
            .or_else(|| trimmed.strip_suffix(".KQ"))
            .unwrap_or(trimmed);

        // 증권사 접두사 제거 (A + 6자리)
        let code = if without_suffix.len() == 7 && without_suffix.starts_with('A') {
            &without_suffix[1..]
        } else {
            without_suffix
        };

        if code.len() == 6 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
            Some(Symbol(code.to_string()))
        } else {
            None
        }
    }

    /// 코드 문자열을 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 소속 시장을 판별합니다.
    ///
    /// 종목 코드 첫 글자로 판별:
    /// - `0`: KOSPI
    /// - `1~4`: KOSDAQ
    /// - 기타: KOSDAQ (기본값)
    pub fn market(&self) -> Market {
        match self.0.chars().next() {
            Some('0') => Market::Kospi,
            Some('1'..='4') => Market::Kosdaq,
            _ => Market::Kosdaq,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::canonicalize(s).ok_or_else(|| format!("Invalid symbol: {}", s))
    }
}
