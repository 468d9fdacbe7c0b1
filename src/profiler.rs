//! 吞吐量剖析器
//!
//! 在 {选中的指标} × {层级} × {年份} 上驱动聚合器，记录每个指标的耗时与
//! 处理的 entity-year 数，最后给出整体吞吐量。
//!
//! 运行模式必须显式选择：
//! - `MeasureOnly`：只测量，聚合结果丢弃（默认）
//! - `MeasureAndPersist`：测量并把聚合结果写入另一个输出存储
//!
//! 运行统计全部放在返回的 `RunReport` 里，没有进程级全局状态。

use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aggregator::{AggregateStats, CoverageAggregator};
use crate::common::{AggError, IndicatorCode, Result, Year};
use crate::config::{HierarchyConfig, IndicatorFilter};
use crate::hierarchy::Hierarchy;
use crate::indicator::LoadFilter;
use crate::store::{IndicatorSource, IndicatorStore};
use crate::threshold::CoverageThreshold;

// ── 配置 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunMode {
    /// 只测量，聚合值丢弃
    #[default]
    MeasureOnly,
    /// 测量并写入该目录下的输出存储（不能与输入存储相同）
    MeasureAndPersist(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct ProfileSettings {
    pub mode:       RunMode,
    pub threshold:  CoverageThreshold,
    pub years:      Option<RangeInclusive<Year>>,
    pub indicators: IndicatorFilter,
    /// 墙钟预算；超出后不再启动新指标，报告标记为不完整
    pub budget:     Option<Duration>,
    /// rayon 线程数；None 使用全局线程池
    pub workers:    Option<usize>,
}

impl ProfileSettings {
    /// 从层级配置文件中取阈值、年份窗口与指标过滤
    pub fn from_config(cfg: &HierarchyConfig) -> Result<Self> {
        Ok(Self {
            threshold:  cfg.threshold()?,
            years:      cfg.year_range()?,
            indicators: cfg.indicators.clone(),
            ..Default::default()
        })
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode; self
    }
}

// ── 结果 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IndicatorTiming {
    pub code:         IndicatorCode,
    /// 选择性加载耗时
    pub load_elapsed: Duration,
    /// 加载 + 聚合（+ 写回）总耗时
    pub elapsed:      Duration,
    pub years:        usize,
    pub stats:        AggregateStats,
}

impl IndicatorTiming {
    pub fn entity_years(&self) -> u64 { self.stats.cells }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedIndicator {
    pub code:   IndicatorCode,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode:                 RunMode,
    pub threshold:            CoverageThreshold,
    /// 预算耗尽提前结束时为 false
    pub complete:             bool,
    pub indicators_selected:  usize,
    pub indicators_excluded:  usize,
    pub indicators_processed: usize,
    pub indicators_persisted: usize,
    pub skipped_corrupt:      Vec<SkippedIndicator>,
    pub not_started:          Vec<IndicatorCode>,
    pub totals:               AggregateStats,
    pub elapsed:              Duration,
    /// 按指标代码排序
    pub timings:              Vec<IndicatorTiming>,
}

impl RunReport {
    pub fn entity_years(&self) -> u64 { self.totals.cells }

    pub fn indicators_per_second(&self) -> f64 {
        per_second(self.indicators_processed as f64, self.elapsed)
    }

    pub fn entity_years_per_second(&self) -> f64 {
        per_second(self.totals.cells as f64, self.elapsed)
    }

    /// 耗时最长的 n 个指标
    pub fn slowest(&self, n: usize) -> Vec<&IndicatorTiming> {
        let mut v: Vec<&IndicatorTiming> = self.timings.iter().collect();
        v.sort_by(|a, b| b.elapsed.cmp(&a.elapsed).then_with(|| a.code.cmp(&b.code)));
        v.truncate(n);
        v
    }
}

fn per_second(count: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count / secs } else { 0.0 }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.mode {
            RunMode::MeasureOnly               => "measure only".to_string(),
            RunMode::MeasureAndPersist(dir)    => format!("measure and persist -> {}", dir.display()),
        };
        if self.complete {
            writeln!(f, "aggregation pass COMPLETE ({mode})")?;
        } else {
            writeln!(f, "aggregation pass INCOMPLETE ({mode}): wall-clock budget exhausted, figures are partial")?;
        }
        writeln!(f, "  threshold           {}", self.threshold)?;
        writeln!(
            f,
            "  indicators          selected={} processed={} excluded={} skipped(corrupt)={} not-started={}",
            self.indicators_selected,
            self.indicators_processed,
            self.indicators_excluded,
            self.skipped_corrupt.len(),
            self.not_started.len(),
        )?;
        if !matches!(self.mode, RunMode::MeasureOnly) {
            writeln!(f, "  persisted           {}", self.indicators_persisted)?;
        }
        writeln!(f, "  entity-years        {}", self.totals.cells)?;
        writeln!(
            f,
            "  coverage failures   {} (near threshold {})",
            self.totals.coverage_failures, self.totals.near_threshold,
        )?;
        writeln!(f, "  invalid raw values  {}", self.totals.invalid_values)?;
        writeln!(f, "  elapsed             {:.3}s", self.elapsed.as_secs_f64())?;
        write!(
            f,
            "  throughput          {:.1} indicators/s, {:.1} entity-years/s",
            self.indicators_per_second(),
            self.entity_years_per_second(),
        )?;
        for s in &self.skipped_corrupt {
            write!(f, "\n  corrupt             {}: {}", s.code, s.reason)?;
        }
        Ok(())
    }
}

// ── 剖析器 ────────────────────────────────────────────────────────────────────

enum Outcome {
    Done { timing: IndicatorTiming, persisted: bool },
    Corrupt(SkippedIndicator),
    NotStarted(IndicatorCode),
}

struct PassContext<'a> {
    aggregator: CoverageAggregator<'a>,
    filter:     LoadFilter,
    output:     Option<IndicatorStore>,
    deadline:   Option<Instant>,
    expired:    AtomicBool,
}

pub struct ThroughputProfiler<'h> {
    hierarchy: &'h Hierarchy,
    settings:  ProfileSettings,
}

impl<'h> ThroughputProfiler<'h> {
    pub fn new(hierarchy: &'h Hierarchy, settings: ProfileSettings) -> Self {
        Self { hierarchy, settings }
    }

    pub fn settings(&self) -> &ProfileSettings { &self.settings }

    /// 对 `source` 中所有选中的指标跑一遍完整聚合
    ///
    /// 损坏的指标被跳过并计数；层级错误、写冲突、I/O 错误中止整个运行。
    pub fn run<S: IndicatorSource>(&self, source: &S) -> Result<RunReport> {
        let started = Instant::now();

        let (selected, excluded): (Vec<IndicatorCode>, Vec<IndicatorCode>) = source
            .list_indicators()?
            .into_iter()
            .partition(|c| self.settings.indicators.allows(c));

        let mut aggregator = CoverageAggregator::new(self.hierarchy, self.settings.threshold);
        if let Some(r) = &self.settings.years {
            aggregator = aggregator.with_years(r.clone());
        }
        let output = match &self.settings.mode {
            RunMode::MeasureOnly              => None,
            RunMode::MeasureAndPersist(dir)   => Some(IndicatorStore::open(dir)?),
        };
        let ctx = PassContext {
            filter: aggregator.load_filter(),
            aggregator,
            output,
            deadline: self.settings.budget.map(|b| started + b),
            expired: AtomicBool::new(false),
        };

        info!(
            indicators = selected.len(),
            excluded = excluded.len(),
            levels = self.hierarchy.max_level(),
            aggregates = self.hierarchy.num_aggregates(),
            threshold = %self.settings.threshold,
            mode = ?self.settings.mode,
            "starting aggregation pass"
        );

        let outcomes = self.in_pool(|| {
            selected
                .par_iter()
                .map(|code| self.process(source, code, &ctx))
                .collect::<Result<Vec<Outcome>>>()
        })??;

        let mut report = RunReport {
            mode:                 self.settings.mode.clone(),
            threshold:            self.settings.threshold,
            complete:             true,
            indicators_selected:  selected.len(),
            indicators_excluded:  excluded.len(),
            indicators_processed: 0,
            indicators_persisted: 0,
            skipped_corrupt:      Vec::new(),
            not_started:          Vec::new(),
            totals:               AggregateStats::default(),
            elapsed:              Duration::ZERO,
            timings:              Vec::with_capacity(outcomes.len()),
        };
        for o in outcomes {
            match o {
                Outcome::Done { timing, persisted } => {
                    report.indicators_processed += 1;
                    report.indicators_persisted += persisted as usize;
                    report.totals += timing.stats;
                    report.timings.push(timing);
                }
                Outcome::Corrupt(s)     => report.skipped_corrupt.push(s),
                Outcome::NotStarted(c)  => report.not_started.push(c),
            }
        }
        report.complete = report.not_started.is_empty();
        report.timings.sort_by(|a, b| a.code.cmp(&b.code));
        report.skipped_corrupt.sort_by(|a, b| a.code.cmp(&b.code));
        report.not_started.sort();
        report.elapsed = started.elapsed();

        if report.complete {
            info!(
                processed = report.indicators_processed,
                skipped = report.skipped_corrupt.len(),
                entity_years = report.totals.cells,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "aggregation pass complete"
            );
        } else {
            warn!(
                processed = report.indicators_processed,
                not_started = report.not_started.len(),
                "aggregation pass aborted by wall-clock budget"
            );
        }
        Ok(report)
    }

    fn in_pool<T: Send>(&self, f: impl FnOnce() -> T + Send) -> Result<T> {
        match self.settings.workers {
            None => Ok(f()),
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| AggError::Config(format!("cannot build worker pool: {e}")))?;
                Ok(pool.install(f))
            }
        }
    }

    fn process<S: IndicatorSource>(
        &self,
        source: &S,
        code:   &str,
        ctx:    &PassContext<'_>,
    ) -> Result<Outcome> {
        if let Some(deadline) = ctx.deadline {
            if ctx.expired.load(Ordering::Relaxed) || Instant::now() >= deadline {
                ctx.expired.store(true, Ordering::Relaxed);
                return Ok(Outcome::NotStarted(code.to_string()));
            }
        }

        let t0  = Instant::now();
        let ind = match source.load(code, &ctx.filter) {
            Ok(ind) => ind,
            Err(AggError::CorruptData { reason, .. }) => {
                warn!(code, %reason, "skipping corrupt indicator");
                return Ok(Outcome::Corrupt(SkippedIndicator { code: code.to_string(), reason }));
            }
            Err(e) => return Err(e),
        };
        let load_elapsed = t0.elapsed();

        let result = ctx.aggregator.aggregate(&ind)?;
        let persisted = match &ctx.output {
            Some(out) => {
                out.save(&result.to_indicator())?;
                true
            }
            None => false,
        };
        let elapsed = t0.elapsed();

        debug!(
            code,
            entity_years = result.stats.cells,
            load_us = load_elapsed.as_micros() as u64,
            total_us = elapsed.as_micros() as u64,
            "indicator processed"
        );
        Ok(Outcome::Done {
            timing: IndicatorTiming {
                code: code.to_string(),
                load_elapsed,
                elapsed,
                years: result.years.len(),
                stats: result.stats,
            },
            persisted,
        })
    }
}
