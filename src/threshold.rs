//! 覆盖率阈值 θ
//!
//! θ 以精确有理数 `numerator / denominator` 表示，判定时做整数交叉相乘，
//! 不经过浮点：`reported * den >= num * n`。因此 3 个成员中 2 个有值时
//! 恰好满足 θ = 2/3。
//!
//! 边界规则可配置：`Inclusive`（≥，默认）或 `Exclusive`（>）。

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::common::{AggError, Result};

/// 阈值边界比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// reported / n ≥ θ
    #[default]
    Inclusive,
    /// reported / n > θ
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageThreshold {
    numerator:   u64,
    denominator: u64,
    boundary:    Boundary,
}

impl CoverageThreshold {
    /// 默认阈值 2/3（含边界）
    pub const TWO_THIRDS: Self = Self { numerator: 2, denominator: 3, boundary: Boundary::Inclusive };

    pub fn new(numerator: u64, denominator: u64) -> Result<Self> {
        if denominator == 0 {
            return Err(AggError::Config("threshold denominator must be non-zero".into()));
        }
        if numerator > denominator {
            return Err(AggError::Config(format!(
                "threshold {numerator}/{denominator} exceeds 1"
            )));
        }
        let g = gcd(numerator, denominator);
        Ok(Self {
            numerator:   numerator / g,
            denominator: denominator / g,
            boundary:    Boundary::Inclusive,
        })
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary; self
    }

    pub fn numerator(&self)   -> u64      { self.numerator }
    pub fn denominator(&self) -> u64      { self.denominator }
    pub fn boundary(&self)    -> Boundary { self.boundary }

    /// `n` 个成员中 `reported` 个有值时是否满足阈值。`n == 0` 永远不满足。
    pub fn is_met(&self, reported: usize, total: usize) -> bool {
        if total == 0 || reported > total {
            return false;
        }
        let lhs = reported as u128 * self.denominator as u128;
        let rhs = self.numerator as u128 * total as u128;
        match self.boundary {
            Boundary::Inclusive => lhs >= rhs,
            Boundary::Exclusive => lhs > rhs,
        }
    }

    /// 未达阈值，但再多一个成员有值即可满足
    pub fn is_near_miss(&self, reported: usize, total: usize) -> bool {
        !self.is_met(reported, total) && reported < total && self.is_met(reported + 1, total)
    }
}

impl Default for CoverageThreshold {
    fn default() -> Self { Self::TWO_THIRDS }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

/// 小数写法最多保留的小数位数
const MAX_FRACTION_DIGITS: usize = 12;

/// 解析十进制小数为精确分数，如 "0.6" → 6/10
fn parse_decimal(s: &str) -> Option<(u64, u64)> {
    let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
    if frac_part.len() > MAX_FRACTION_DIGITS || (int_part.is_empty() && frac_part.is_empty()) {
        return None;
    }
    let digits = format!("{int_part}{frac_part}");
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let numerator   = digits.parse::<u64>().ok()?;
    let denominator = 10u64.checked_pow(frac_part.len() as u32)?;
    Some((numerator, denominator))
}

/// 接受 `"2/3"`、`"0.6"`、`"60%"` 三种写法
impl FromStr for CoverageThreshold {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        let s   = s.trim();
        let bad = || AggError::Config(format!(
            "invalid coverage threshold: {s:?} (decimals take at most {MAX_FRACTION_DIGITS} fraction digits; \
             write repeating fractions as \"2/3\")"
        ));

        if let Some((num, den)) = s.split_once('/') {
            let num = num.trim().parse::<u64>().map_err(|_| bad())?;
            let den = den.trim().parse::<u64>().map_err(|_| bad())?;
            return Self::new(num, den);
        }
        if let Some(pct) = s.strip_suffix('%') {
            let (num, den) = parse_decimal(pct.trim()).ok_or_else(bad)?;
            return Self::new(num, den.checked_mul(100).ok_or_else(bad)?);
        }
        let (num, den) = parse_decimal(s).ok_or_else(bad)?;
        Self::new(num, den)
    }
}

impl fmt::Display for CoverageThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.boundary {
            Boundary::Inclusive => ">=",
            Boundary::Exclusive => ">",
        };
        write!(f, "{op} {}/{}", self.numerator, self.denominator)
    }
}
