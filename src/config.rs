//! 层级 / 运行配置（YAML）
//!
//! ```yaml
//! threshold: "2/3"          # 也可写 0.6 或 "60%"；小数最多 12 位，循环小数请写成分数
//! boundary: inclusive       # inclusive (>=) | exclusive (>)
//! years: { start: 1990, end: 2022 }
//! base_entities: [USA, CAN, MEX, FRA, DEU]
//! groups:
//!   NAC: [USA, CAN]
//!   LCN: [MEX]
//!   ECS: [FRA, DEU]
//! world: WLD                # 可选：成员为全部基础实体
//! indicators:
//!   include: []             # 空 = 全部
//!   exclude: [SP.POP.TOTL.ZG]
//! ```
//!
//! `base_entities` 省略时，所有不是 group 的成员都视为基础实体。

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::Deserialize;

use crate::common::{normalize_code, AggError, EntityCode, Result, Year};
use crate::hierarchy::Hierarchy;
use crate::threshold::{Boundary, CoverageThreshold};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawThreshold {
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YearWindow {
    pub start: Year,
    pub end:   Year,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorFilter {
    #[serde(default)]
    pub include: BTreeSet<String>,
    #[serde(default)]
    pub exclude: BTreeSet<String>,
}

impl IndicatorFilter {
    /// include 为空表示不限；exclude 优先
    pub fn allows(&self, code: &str) -> bool {
        let code = normalize_code(code);
        let included = self.include.is_empty()
            || self.include.iter().any(|c| normalize_code(c) == code);
        included && !self.exclude.iter().any(|c| normalize_code(c) == code)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HierarchyConfig {
    #[serde(default)]
    threshold:         Option<RawThreshold>,
    #[serde(default)]
    pub boundary:      Boundary,
    #[serde(default)]
    pub years:         Option<YearWindow>,
    #[serde(default)]
    pub base_entities: Vec<EntityCode>,
    #[serde(default)]
    pub groups:        BTreeMap<EntityCode, Vec<EntityCode>>,
    #[serde(default)]
    pub world:         Option<EntityCode>,
    #[serde(default)]
    pub indicators:    IndicatorFilter,
}

impl HierarchyConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AggError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// 配置的阈值；未配置时为 2/3
    pub fn threshold(&self) -> Result<CoverageThreshold> {
        let t = match &self.threshold {
            None                            => CoverageThreshold::TWO_THIRDS,
            Some(RawThreshold::Text(s))     => s.parse()?,
            Some(RawThreshold::Number(n))   => n.to_string().parse()?,
        };
        Ok(t.with_boundary(self.boundary))
    }

    pub fn year_range(&self) -> Result<Option<RangeInclusive<Year>>> {
        match self.years {
            None => Ok(None),
            Some(w) if w.start <= w.end => Ok(Some(w.start..=w.end)),
            Some(w) => Err(AggError::Config(format!("empty year window {}..{}", w.start, w.end))),
        }
    }

    /// 基础实体：显式声明优先，否则从成员中推断
    pub fn base_entities(&self) -> BTreeSet<EntityCode> {
        if !self.base_entities.is_empty() {
            return self.base_entities.iter().map(|e| normalize_code(e)).collect();
        }
        let mut groups: BTreeSet<EntityCode> = self.groups.keys().map(|g| normalize_code(g)).collect();
        if let Some(world) = &self.world {
            groups.insert(normalize_code(world));
        }
        self.groups
            .values()
            .flatten()
            .map(|m| normalize_code(m))
            .filter(|m| !groups.contains(m))
            .collect()
    }

    /// 校验并构建层级（含可选的 world 组）
    pub fn build_hierarchy(&self) -> Result<Hierarchy> {
        let base = self.base_entities();
        let mut groups = self.groups.clone();
        if let Some(world) = &self.world {
            if groups.keys().any(|g| normalize_code(g) == normalize_code(world)) {
                return Err(AggError::Config(format!(
                    "world group {world} is also listed under groups"
                )));
            }
            groups.insert(world.clone(), base.iter().cloned().collect());
        }
        Hierarchy::new(base, groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
threshold: 0.6
years: { start: 2000, end: 2020 }
groups:
  RA: [C1, C2, C3]
  RB: [C4]
world: WLD
indicators:
  exclude: [sp.pop.totl.zg]
"#;

    #[test]
    fn test_sample_config() {
        let cfg = HierarchyConfig::from_yaml_str(SAMPLE).unwrap();
        let t = cfg.threshold().unwrap();
        assert_eq!((t.numerator(), t.denominator()), (3, 5));
        assert_eq!(cfg.year_range().unwrap(), Some(2000..=2020));

        let h = cfg.build_hierarchy().unwrap();
        assert_eq!(h.base_entities().len(), 4);
        assert_eq!(h.members_of("WLD").unwrap().len(), 4);
        assert_eq!(h.level_of("WLD").unwrap(), 1);

        assert!(cfg.indicators.allows("NY.GDP.MKTP.CD"));
        assert!(!cfg.indicators.allows("SP.POP.TOTL.ZG"));
    }

    #[test]
    fn test_defaults() {
        let cfg = HierarchyConfig::from_yaml_str("groups: {A: [X]}").unwrap();
        assert_eq!(cfg.threshold().unwrap(), CoverageThreshold::TWO_THIRDS);
        assert_eq!(cfg.year_range().unwrap(), None);
    }

    #[test]
    fn test_exclusive_boundary_and_fraction_text() {
        let cfg = HierarchyConfig::from_yaml_str("threshold: \"2/3\"\nboundary: exclusive\n").unwrap();
        let t = cfg.threshold().unwrap();
        assert!(!t.is_met(2, 3));
    }

    #[test]
    fn test_cycle_from_config() {
        let cfg = HierarchyConfig::from_yaml_str("base_entities: [C1]\ngroups: {A: [B], B: [A]}").unwrap();
        assert!(matches!(cfg.build_hierarchy(), Err(AggError::Cycle(_))));
    }

    #[test]
    fn test_long_decimal_threshold_points_to_fraction() {
        let cfg = HierarchyConfig::from_yaml_str("threshold: 0.6666666666666666").unwrap();
        let msg = cfg.threshold().unwrap_err().to_string();
        assert!(msg.contains("12 fraction digits"));
        assert!(msg.contains("\"2/3\""));

        let cfg = HierarchyConfig::from_yaml_str("threshold: 0.666666666667").unwrap();
        assert!(cfg.threshold().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(HierarchyConfig::from_yaml_str("treshold: 0.5").is_err());
    }

    #[test]
    fn test_include_list() {
        let cfg = HierarchyConfig::from_yaml_str("indicators: {include: [A.B]}").unwrap();
        assert!(cfg.indicators.allows("a.b"));
        assert!(!cfg.indicators.allows("A.C"));
    }
}
