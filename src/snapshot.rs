//! 历史快照接口
//!
//! 版本存储与 diff 由外部的内容寻址历史系统负责；这里只依赖它的两个操作，
//! 并把某个快照适配成 `IndicatorSource`，让聚合器可以直接在快照上运行。

use std::collections::BTreeSet;
use std::fmt;

use tracing::info;

use crate::common::{normalize_code, IndicatorCode, Result};
use crate::indicator::{Indicator, LoadFilter};
use crate::store::IndicatorSource;

/// 外部快照标识（提交号、标签等），不解释其内容
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(pub String);

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self { Self(s.into()) }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 外部历史系统需要提供的能力
pub trait SnapshotSource: Sync {
    /// 读取某个快照中的指标；不存在时返回 `NotFound`
    fn read_indicator_at(&self, code: &str, snapshot: &SnapshotId) -> Result<Indicator>;
    /// 两个快照之间内容有变化的指标代码
    fn changed_indicators_between(
        &self,
        from: &SnapshotId,
        to:   &SnapshotId,
    ) -> Result<BTreeSet<IndicatorCode>>;
}

/// 固定在某个快照上、并限定指标清单的只读视图
pub struct SnapshotView<'a, S> {
    source:   &'a S,
    snapshot: SnapshotId,
    codes:    Vec<IndicatorCode>,
}

impl<'a, S: SnapshotSource> SnapshotView<'a, S> {
    /// 快照上的指定指标
    pub fn new<I, C>(source: &'a S, snapshot: SnapshotId, codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<str>,
    {
        let codes: BTreeSet<IndicatorCode> = codes.into_iter().map(|c| normalize_code(c.as_ref())).collect();
        Self { source, snapshot, codes: codes.into_iter().collect() }
    }

    /// 只包含 `from` → `to` 之间有变化的指标，读取 `to` 上的内容
    pub fn changed_between(source: &'a S, from: &SnapshotId, to: &SnapshotId) -> Result<Self> {
        let changed = source.changed_indicators_between(from, to)?;
        info!(%from, %to, changed = changed.len(), "snapshot view over changed indicators");
        Ok(Self::new(source, to.clone(), changed))
    }

    pub fn snapshot(&self) -> &SnapshotId { &self.snapshot }
}

impl<S: SnapshotSource> IndicatorSource for SnapshotView<'_, S> {
    fn list_indicators(&self) -> Result<Vec<IndicatorCode>> {
        Ok(self.codes.clone())
    }

    /// 历史系统不支持选择性读取，整体读出后再裁剪
    fn load(&self, code: &str, filter: &LoadFilter) -> Result<Indicator> {
        let ind = self.source.read_indicator_at(&normalize_code(code), &self.snapshot)?;
        Ok(ind.filtered(filter))
    }
}
