//! 指标的规范化内存表示
//!
//! 无论原始导出来自何种表格格式，进入引擎后都只以这里的强类型形式出现：
//! `Indicator` = 代码 + 名称 + 单位 + `(entity, year) → Observation`。

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use crate::common::{normalize_code, AggError, EntityCode, Result, Year};

// ── Observation ───────────────────────────────────────────────────────────────

/// 单个观测值的三态表示
///
/// 缺失是一等状态，不是 0；`Invalid` 表示原始值不是数字（数据质量问题），
/// 聚合时视同缺失，但会被单独计数上报。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// 有限数值
    Present(f64),
    Missing,
    Invalid,
}

impl Observation {
    /// 非有限值（NaN / ±inf）归为 `Invalid`
    pub fn present(v: f64) -> Self {
        if v.is_finite() { Self::Present(v) } else { Self::Invalid }
    }

    /// 解析一个原始单元格文本。空串及常见缺失标记（`..`、`NA`、`NaN`）为
    /// `Missing`，无法解析为有限数值的为 `Invalid`。
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() || s == ".." || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") {
            return Self::Missing;
        }
        match s.replace(',', "").parse::<f64>() {
            Ok(v) => Self::present(v),
            Err(_) => Self::Invalid,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self { Self::Present(v) => Some(*v), _ => None }
    }

    pub fn is_present(&self) -> bool { matches!(self, Self::Present(_)) }
    pub fn is_invalid(&self) -> bool { matches!(self, Self::Invalid) }

    /// 容器中的状态标签
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Self::Missing    => 0,
            Self::Present(_) => 1,
            Self::Invalid    => 2,
        }
    }
}

impl From<Option<f64>> for Observation {
    fn from(v: Option<f64>) -> Self {
        v.map(Self::present).unwrap_or(Self::Missing)
    }
}

// ── LoadFilter ────────────────────────────────────────────────────────────────

/// 选择性加载条件：实体子集 + 年份闭区间，均可省略
#[derive(Debug, Clone, Default)]
pub struct LoadFilter {
    pub entities: Option<BTreeSet<EntityCode>>,
    pub years:    Option<RangeInclusive<Year>>,
}

impl LoadFilter {
    pub fn all() -> Self { Self::default() }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.entities = Some(entities.into_iter().map(|e| normalize_code(e.as_ref())).collect());
        self
    }

    pub fn with_years(mut self, years: RangeInclusive<Year>) -> Self {
        self.years = Some(years); self
    }

    pub fn accepts_entity(&self, entity: &str) -> bool {
        self.entities.as_ref().map_or(true, |s| s.contains(entity))
    }

    pub fn accepts_year(&self, year: Year) -> bool {
        self.years.as_ref().map_or(true, |r| r.contains(&year))
    }
}

// ── Indicator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Indicator {
    pub code: String,
    pub name: String,
    pub unit: String,
    /// entity → year → observation
    series:   BTreeMap<EntityCode, BTreeMap<Year, Observation>>,
}

impl Indicator {
    pub fn new(code: &str, name: &str, unit: &str) -> Self {
        Self {
            code: normalize_code(code),
            name: name.into(),
            unit: unit.into(),
            series: BTreeMap::new(),
        }
    }

    /// 插入一个观测值；重复的 (entity, year) 键视为数据损坏
    pub fn insert(&mut self, entity: &str, year: Year, obs: Observation) -> Result<()> {
        let entity = normalize_code(entity);
        let row = self.series.entry(entity.clone()).or_default();
        if row.insert(year, obs).is_some() {
            return Err(AggError::corrupt(
                &self.code,
                format!("duplicate key ({entity}, {year})"),
            ));
        }
        Ok(())
    }

    /// 登记一个实体行（可以没有任何观测值）
    pub fn add_entity(&mut self, entity: &str) {
        self.series.entry(normalize_code(entity)).or_default();
    }

    /// 写入（覆盖）一个观测值
    pub fn set(&mut self, entity: &str, year: Year, obs: Observation) {
        self.series.entry(normalize_code(entity)).or_default().insert(year, obs);
    }

    /// 链式构造，测试与演示中常用；重复键时后者覆盖前者
    pub fn with(mut self, entity: &str, year: Year, value: Option<f64>) -> Self {
        self.set(entity, year, value.into());
        self
    }

    /// 未出现的键读作 `Missing`
    pub fn get(&self, entity: &str, year: Year) -> Observation {
        self.series
            .get(entity)
            .and_then(|row| row.get(&year))
            .copied()
            .unwrap_or(Observation::Missing)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityCode> {
        self.series.keys()
    }

    /// 所有实体上出现过的年份并集（升序）
    pub fn years(&self) -> BTreeSet<Year> {
        self.series.values().flat_map(|row| row.keys().copied()).collect()
    }

    pub fn num_entities(&self) -> usize { self.series.len() }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|row| row.is_empty())
    }

    /// 有值（Present）的单元格数
    pub fn count_present(&self) -> usize {
        self.series.values().flat_map(|r| r.values()).filter(|o| o.is_present()).count()
    }

    /// (entity, year, observation)，按实体再按年份升序
    pub fn iter(&self) -> impl Iterator<Item = (&EntityCode, Year, Observation)> {
        self.series
            .iter()
            .flat_map(|(e, row)| row.iter().map(move |(y, o)| (e, *y, *o)))
    }

    /// 按条件裁剪出子集
    pub fn filtered(&self, filter: &LoadFilter) -> Self {
        let series = self.series
            .iter()
            .filter(|(e, _)| filter.accepts_entity(e))
            .map(|(e, row)| {
                let row: BTreeMap<Year, Observation> = row.iter()
                    .filter(|(y, _)| filter.accepts_year(**y))
                    .map(|(y, o)| (*y, *o))
                    .collect();
                (e.clone(), row)
            })
            .collect();
        Self { code: self.code.clone(), name: self.name.clone(), unit: self.unit.clone(), series }
    }
}

/// 两个指标相等 ⇔ 元数据相同且所有 (entity, year) 的读值相同；
/// 显式 `Missing` 与键不存在等价。
impl PartialEq for Indicator {
    fn eq(&self, other: &Self) -> bool {
        if self.code != other.code || self.name != other.name || self.unit != other.unit {
            return false;
        }
        let entities: BTreeSet<&EntityCode> = self.entities().chain(other.entities()).collect();
        let years: BTreeSet<Year> = self.years().union(&other.years()).copied().collect();
        entities.iter().all(|e| {
            years.iter().all(|&y| self.get(e, y) == other.get(e, y))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_observation() {
        assert_eq!(Observation::parse("12.5"), Observation::Present(12.5));
        assert_eq!(Observation::parse(" 1,200 "), Observation::Present(1200.0));
        assert_eq!(Observation::parse(""), Observation::Missing);
        assert_eq!(Observation::parse(".."), Observation::Missing);
        assert_eq!(Observation::parse("NaN"), Observation::Missing);
        assert_eq!(Observation::parse("n/a"), Observation::Invalid);
        assert_eq!(Observation::parse("inf"), Observation::Invalid);
    }

    #[test]
    fn test_duplicate_key_is_corrupt() {
        let mut ind = Indicator::new("sp.pop.totl", "Population", "people");
        ind.insert("usa", 2020, Observation::Present(1.0)).unwrap();
        let err = ind.insert("USA", 2020, Observation::Present(2.0)).unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(ind.code, "SP.POP.TOTL");
    }

    #[test]
    fn test_absent_reads_missing() {
        let ind = Indicator::new("X", "", "").with("USA", 2020, Some(1.0));
        assert_eq!(ind.get("USA", 2021), Observation::Missing);
        assert_eq!(ind.get("FRA", 2020), Observation::Missing);
    }

    #[test]
    fn test_equality_treats_explicit_missing_as_absent() {
        let a = Indicator::new("X", "n", "u").with("USA", 2020, Some(1.0));
        let b = a.clone().with("USA", 2021, None).with("FRA", 2020, None);
        assert_eq!(a, b);
        let c = a.clone().with("USA", 2021, Some(0.0));
        assert_ne!(a, c);
    }

    #[test]
    fn test_filtered() {
        let ind = Indicator::new("X", "", "")
            .with("USA", 2019, Some(1.0))
            .with("USA", 2020, Some(2.0))
            .with("FRA", 2020, Some(3.0));
        let f = LoadFilter::all().with_entities(["usa"]).with_years(2020..=2020);
        let sub = ind.filtered(&f);
        assert_eq!(sub.num_entities(), 1);
        assert_eq!(sub.years().into_iter().collect::<Vec<_>>(), vec![2020]);
        assert_eq!(sub.get("USA", 2020), Observation::Present(2.0));
    }
}
