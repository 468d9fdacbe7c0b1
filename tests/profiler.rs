use std::fs;
use std::path::Path;
use std::time::Duration;

use indicator_agg_engine::config::HierarchyConfig;
use indicator_agg_engine::hierarchy::Hierarchy;
use indicator_agg_engine::indicator::{Indicator, LoadFilter, Observation};
use indicator_agg_engine::profiler::{ProfileSettings, RunMode, ThroughputProfiler};
use indicator_agg_engine::store::{IndicatorSource, IndicatorStore};

const CONFIG: &str = r#"
groups:
  RA: [C1, C2, C3]
  RB: [C4]
world: WLD
indicators:
  exclude: [SKIP.ME]
"#;

fn seeded_store(root: &Path) -> IndicatorStore {
    let store = IndicatorStore::open(root).unwrap();
    for (i, code) in ["AA.ONE", "AA.TWO", "BB.ONE"].iter().enumerate() {
        let base = (i + 1) as f64;
        let ind = Indicator::new(code, "", "")
            .with("C1", 2019, Some(base))
            .with("C2", 2019, Some(base))
            .with("C4", 2019, Some(base))
            .with("C1", 2020, Some(base));
        store.save(&ind).unwrap();
    }
    store.save(&Indicator::new("SKIP.ME", "", "").with("C1", 2019, Some(1.0))).unwrap();
    store
}

fn setup(root: &Path) -> (IndicatorStore, Hierarchy, ProfileSettings) {
    let store = seeded_store(root);
    let cfg   = HierarchyConfig::from_yaml_str(CONFIG).unwrap();
    let h     = cfg.build_hierarchy().unwrap();
    (store, h, ProfileSettings::from_config(&cfg).unwrap())
}

#[test]
fn test_measure_only_pass() {
    let dir = tempfile::tempdir().unwrap();
    let (store, h, settings) = setup(dir.path());
    let report = ThroughputProfiler::new(&h, settings).run(&store).unwrap();

    assert!(report.complete);
    assert_eq!(report.indicators_selected, 3);
    assert_eq!(report.indicators_excluded, 1);
    assert_eq!(report.indicators_processed, 3);
    assert_eq!(report.indicators_persisted, 0);
    assert!(report.skipped_corrupt.is_empty());
    // 3 个聚合实体 × 2 年 × 3 个指标
    assert_eq!(report.entity_years(), 18);
    // 2020 年 RA 1/3、RB 0/1、WLD 1/4 全部缺失
    assert_eq!(report.totals.coverage_failures, 9);
    assert!(report.to_string().contains("COMPLETE (measure only)"));
}

#[test]
fn test_corrupt_indicator_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (store, h, settings) = setup(dir.path());

    let bad = store.path_for("BB.BROKEN").unwrap();
    fs::write(&bad, b"definitely not a container").unwrap();

    let truncated = store.path_for("AA.TWO").unwrap();
    let bytes = fs::read(&truncated).unwrap();
    fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();

    let report = ThroughputProfiler::new(&h, settings).run(&store).unwrap();
    assert!(report.complete);
    assert_eq!(report.indicators_processed, 2);
    let skipped: Vec<&str> = report.skipped_corrupt.iter().map(|s| s.code.as_str()).collect();
    assert_eq!(skipped, vec!["AA.TWO", "BB.BROKEN"]);
}

#[test]
fn test_non_utf8_header_skipped_as_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let (store, h, settings) = setup(dir.path());
    store.save(&Indicator::new("BB.BAD", "Bad name", "").with("C1", 2019, Some(1.0))).unwrap();

    let path = store.path_for("BB.BAD").unwrap();
    let mut bytes = fs::read(&path).unwrap();
    // MAGIC(8) + version(4) + code_len(2) + code + name_len(4)
    bytes[8 + 4 + 2 + "BB.BAD".len() + 4] = 0xFF;
    fs::write(&path, bytes).unwrap();

    let report = ThroughputProfiler::new(&h, settings).run(&store).unwrap();
    assert_eq!(report.indicators_processed, 3);
    assert_eq!(report.skipped_corrupt.len(), 1);
    assert_eq!(report.skipped_corrupt[0].code, "BB.BAD");
    assert_eq!(report.skipped_corrupt[0].reason, "header is not utf-8");
}

#[test]
fn test_persist_mode_writes_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("aggregates");
    let (store, h, settings) = setup(&dir.path().join("data"));

    let settings = settings.with_mode(RunMode::MeasureAndPersist(out.clone()));
    let report = ThroughputProfiler::new(&h, settings).run(&store).unwrap();
    assert_eq!(report.indicators_persisted, 3);

    let aggregates = IndicatorStore::open(&out).unwrap();
    assert_eq!(aggregates.list_indicators().unwrap(), vec!["AA.ONE", "AA.TWO", "BB.ONE"]);

    let two = aggregates.load("AA.TWO", &LoadFilter::all()).unwrap();
    assert_eq!(two.get("RA", 2019), Observation::Present(4.0));
    assert_eq!(two.get("RB", 2019), Observation::Present(2.0));
    assert_eq!(two.get("WLD", 2019), Observation::Present(6.0));
    assert_eq!(two.get("WLD", 2020), Observation::Missing);
    // 原始存储不受影响
    assert!(!store.contains("RA"));
    assert_eq!(store.list_indicators().unwrap().len(), 4);
}

#[test]
fn test_two_persisted_runs_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("aggregates");
    let (store, h, settings) = setup(&dir.path().join("data"));
    let settings = settings.with_mode(RunMode::MeasureAndPersist(out.clone()));

    let profiler = ThroughputProfiler::new(&h, settings);
    profiler.run(&store).unwrap();
    let aggregates = IndicatorStore::open(&out).unwrap();
    let path  = aggregates.path_for("BB.ONE").unwrap();
    let first = fs::read(&path).unwrap();

    profiler.run(&store).unwrap();
    assert_eq!(fs::read(&path).unwrap(), first);
}

#[test]
fn test_exhausted_budget_marks_report_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let (store, h, settings) = setup(dir.path());
    let settings = ProfileSettings { budget: Some(Duration::ZERO), ..settings };

    let report = ThroughputProfiler::new(&h, settings).run(&store).unwrap();
    assert!(!report.complete);
    assert_eq!(report.not_started, vec!["AA.ONE", "AA.TWO", "BB.ONE"]);
    assert!(report.to_string().contains("INCOMPLETE"));
}

#[test]
fn test_fixed_worker_pool() {
    let dir = tempfile::tempdir().unwrap();
    let (store, h, settings) = setup(dir.path());
    let settings = ProfileSettings { workers: Some(1), ..settings };
    let report = ThroughputProfiler::new(&h, settings).run(&store).unwrap();
    assert_eq!(report.indicators_processed, 3);
    assert_eq!(report.timings.len(), 3);
}
