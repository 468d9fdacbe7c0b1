//! 覆盖率阈值聚合器
//!
//! 对指标 I、年份 Y、聚合实体 E（成员集 M）：
//!   1. 取 M 中每个成员在 (I, Y) 上的值；成员若是聚合实体，取本次运行中
//!      更低层已算出的值，不重新从国家推导
//!   2. n = |M|，reported = 有值成员数
//!   3. reported / n 满足 θ ⇒ E 的值 = 有值成员之和（缺失不计为 0）
//!   4. 否则 E 在 (I, Y) 上缺失；n = 0 时恒为缺失
//!
//! 层间是硬屏障：第 k 层全部写入结果表后才开始第 k+1 层；
//! 同层内各实体互不依赖，用 rayon 并行计算。

use std::collections::BTreeMap;
use std::ops::{AddAssign, RangeInclusive};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::common::{AggError, EntityCode, Result, Year};
use crate::hierarchy::Hierarchy;
use crate::indicator::{Indicator, LoadFilter, Observation};
use crate::threshold::CoverageThreshold;

// ── 结果表 ────────────────────────────────────────────────────────────────────

/// (entity, year) → 聚合值，每个键只能写一次
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateTable {
    cells: BTreeMap<EntityCode, BTreeMap<Year, Option<f64>>>,
}

impl AggregateTable {
    /// 重复写同一键说明层级顺序出错，返回 `WriteConflict`
    pub fn insert(&mut self, entity: &str, year: Year, value: Option<f64>) -> Result<()> {
        let row = self.cells.entry(entity.to_string()).or_default();
        if row.contains_key(&year) {
            return Err(AggError::WriteConflict { entity: entity.into(), year });
        }
        row.insert(year, value);
        Ok(())
    }

    /// 外层 `None` = 尚未计算；内层 `None` = 已计算但缺失
    pub fn get(&self, entity: &str, year: Year) -> Option<Option<f64>> {
        self.cells.get(entity).and_then(|row| row.get(&year)).copied()
    }

    pub fn value(&self, entity: &str, year: Year) -> Option<f64> {
        self.get(entity, year).flatten()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.values().map(|r| r.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityCode, Year, Option<f64>)> {
        self.cells
            .iter()
            .flat_map(|(e, row)| row.iter().map(move |(y, v)| (e, *y, *v)))
    }
}

// ── 统计 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// 计算过的 (aggregate entity, year) 单元数
    pub cells:             u64,
    /// 得到数值的单元数
    pub reported:          u64,
    /// 未达阈值（含无成员）而缺失的单元数
    pub coverage_failures: u64,
    /// 未达阈值、但只差一个成员的单元数
    pub near_threshold:    u64,
    /// 基础实体上的非数值原始值个数
    pub invalid_values:    u64,
}

impl AddAssign for AggregateStats {
    fn add_assign(&mut self, o: Self) {
        self.cells             += o.cells;
        self.reported          += o.reported;
        self.coverage_failures += o.coverage_failures;
        self.near_threshold    += o.near_threshold;
        self.invalid_values    += o.invalid_values;
    }
}

// ── 单指标结果 ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub code:  String,
    pub name:  String,
    pub unit:  String,
    pub years: Vec<Year>,
    pub table: AggregateTable,
    pub stats: AggregateStats,
}

impl AggregateResult {
    pub fn value(&self, entity: &str, year: Year) -> Option<f64> {
        self.table.value(entity, year)
    }

    /// 转成可写回存储的指标（聚合实体作为行）
    pub fn to_indicator(&self) -> Indicator {
        let mut ind = Indicator::new(&self.code, &self.name, &self.unit);
        for (entity, year, value) in self.table.iter() {
            ind.set(entity, year, Observation::from(value));
        }
        ind
    }
}

// ── 聚合器 ────────────────────────────────────────────────────────────────────

struct Cell {
    year:     Year,
    value:    Option<f64>,
    reported: usize,
    total:    usize,
}

pub struct CoverageAggregator<'h> {
    hierarchy: &'h Hierarchy,
    threshold: CoverageThreshold,
    years:     Option<RangeInclusive<Year>>,
}

impl<'h> CoverageAggregator<'h> {
    pub fn new(hierarchy: &'h Hierarchy, threshold: CoverageThreshold) -> Self {
        Self { hierarchy, threshold, years: None }
    }

    /// 只聚合该年份范围
    pub fn with_years(mut self, years: RangeInclusive<Year>) -> Self {
        self.years = Some(years); self
    }

    pub fn threshold(&self) -> CoverageThreshold { self.threshold }
    pub fn hierarchy(&self) -> &Hierarchy { self.hierarchy }

    /// 聚合只需要基础实体行
    pub fn load_filter(&self) -> LoadFilter {
        let mut f = LoadFilter::all().with_entities(self.hierarchy.base_entities());
        if let Some(r) = &self.years {
            f = f.with_years(r.clone());
        }
        f
    }

    /// 按层级顺序计算一个指标的所有聚合值
    pub fn aggregate(&self, ind: &Indicator) -> Result<AggregateResult> {
        let years: Vec<Year> = ind.years()
            .into_iter()
            .filter(|y| self.years.as_ref().map_or(true, |r| r.contains(y)))
            .collect();

        let mut stats = AggregateStats {
            invalid_values: self.count_invalid(ind, &years),
            ..Default::default()
        };
        if stats.invalid_values > 0 {
            warn!(
                code = %ind.code,
                invalid = stats.invalid_values,
                "non-numeric raw values treated as missing"
            );
        }

        let mut table = AggregateTable::default();
        for (level, entities) in self.hierarchy.aggregate_levels() {
            let computed = entities
                .par_iter()
                .map(|e| -> Result<(&EntityCode, Vec<Cell>)> {
                    let members = self.hierarchy.members_of(e)?;
                    let cells = years
                        .iter()
                        .map(|&y| self.aggregate_cell(e, members.iter(), y, ind, &table))
                        .collect::<Result<Vec<_>>>()?;
                    Ok((e, cells))
                })
                .collect::<Result<Vec<_>>>()?;

            // 屏障：本层全部落表后才进入下一层
            for (entity, cells) in computed {
                for c in cells {
                    self.record(&mut stats, &c);
                    table.insert(entity, c.year, c.value)?;
                }
            }
            debug!(code = %ind.code, level, entities = entities.len(), "level aggregated");
        }

        debug!(
            code = %ind.code,
            cells = stats.cells,
            reported = stats.reported,
            coverage_failures = stats.coverage_failures,
            "indicator aggregated"
        );

        Ok(AggregateResult {
            code: ind.code.clone(),
            name: ind.name.clone(),
            unit: ind.unit.clone(),
            years,
            table,
            stats,
        })
    }

    fn aggregate_cell<'m>(
        &self,
        entity:  &str,
        members: impl ExactSizeIterator<Item = &'m EntityCode>,
        year:    Year,
        ind:     &Indicator,
        table:   &AggregateTable,
    ) -> Result<Cell> {
        let total = members.len();
        let mut reported = 0usize;
        let mut sum = 0.0f64;

        for m in members {
            let v = if self.hierarchy.is_aggregate(m) {
                table.get(m, year).ok_or_else(|| AggError::Invariant(format!(
                    "member {m} of {entity} not yet aggregated for {year}"
                )))?
            } else {
                ind.get(m, year).value()
            };
            if let Some(v) = v {
                reported += 1;
                sum += v;
            }
        }

        let value = self.threshold.is_met(reported, total).then_some(sum);
        Ok(Cell { year, value, reported, total })
    }

    fn record(&self, stats: &mut AggregateStats, c: &Cell) {
        stats.cells += 1;
        if c.value.is_some() {
            stats.reported += 1;
        } else {
            stats.coverage_failures += 1;
            if self.threshold.is_near_miss(c.reported, c.total) {
                stats.near_threshold += 1;
            }
        }
    }

    fn count_invalid(&self, ind: &Indicator, years: &[Year]) -> u64 {
        self.hierarchy
            .base_entities()
            .iter()
            .map(|e| years.iter().filter(|&&y| ind.get(e, y).is_invalid()).count() as u64)
            .sum()
    }
}
