//! # indicator-agg-engine
//!
//! 面向"指标 × 实体 × 年份"统计数据的存储与分层聚合引擎：
//! - **存储层**：每个指标一个列存容器文件（每年一页，LZ4 + CRC32）
//! - **聚合层**：按分类层级自底向上计算区域 / 收入组合计，覆盖率不足即缺失
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ThroughputProfiler                         │
//! │   指标清单 ──rayon──► 每个指标：选择性加载 → 聚合 → (写回)     │
//! │        │                         │                            │
//! │  IndicatorSource           CoverageAggregator                 │
//! │   ├─ IndicatorStore          ├─ Hierarchy   (分层 / 环检测)    │
//! │   └─ SnapshotView            ├─ CoverageThreshold (有理数 θ)   │
//! │        │                     └─ AggregateTable (一次写入)      │
//! │   容器文件 <root>/<prefix>/<CODE>.ind                          │
//! │   ┌────────────────────────────────────────────────────┐      │
//! │   │  Header (code / name / unit)                       │      │
//! │   │  Page × 年份  ── encoding (RLE 状态 + f64 值)       │      │
//! │   │               └─ compression (LZ4/None) + CRC32    │      │
//! │   │  Entity 字典 (升序) + CRC32                         │      │
//! │   │  Footer (年份 → 页偏移) + CRC32 + MAGIC             │      │
//! │   └────────────────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

// ── 基础 ──────────────────────────────────────────────────────────────────────
pub mod common;
pub mod threshold;
pub mod indicator;

// ── 存储层 ────────────────────────────────────────────────────────────────────
pub mod encoding;
pub mod compression;
pub mod page;
pub mod container;
pub mod store;
pub mod snapshot;

// ── 聚合层 ────────────────────────────────────────────────────────────────────
pub mod hierarchy;
pub mod aggregator;
pub mod config;
pub mod profiler;

pub use common::{AggError, Result};
