use indicator_agg_engine::aggregator::CoverageAggregator;
use indicator_agg_engine::common::AggError;
use indicator_agg_engine::config::HierarchyConfig;
use indicator_agg_engine::container::ContainerWriter;
use indicator_agg_engine::hierarchy::Hierarchy;
use indicator_agg_engine::indicator::{Indicator, LoadFilter, Observation};
use indicator_agg_engine::store::{IndicatorSource, IndicatorStore};
use indicator_agg_engine::threshold::{Boundary, CoverageThreshold};

fn regions() -> Hierarchy {
    Hierarchy::new(
        ["C1", "C2", "C3", "C4"],
        [
            ("RA",  vec!["C1", "C2", "C3"]),
            ("RB",  vec!["C4"]),
            ("WLD", vec!["RA", "RB"]),
        ],
    )
    .unwrap()
}

fn population() -> Indicator {
    Indicator::new("SP.POP.TOTL", "Population", "people")
        .with("C1", 2020, Some(10.0))
        .with("C2", 2020, Some(20.0))
        .with("C3", 2020, None)
        .with("C4", 2020, Some(5.0))
        .with("C1", 2021, Some(10.0))
        .with("OTHER", 2020, Some(1e9))
}

#[test]
fn test_store_round_trip_then_aggregate() {
    let dir   = tempfile::tempdir().unwrap();
    let store = IndicatorStore::open(dir.path()).unwrap();
    store.save(&population()).unwrap();

    let h   = regions();
    let agg = CoverageAggregator::new(&h, CoverageThreshold::TWO_THIRDS);
    let ind = store.load("SP.POP.TOTL", &agg.load_filter()).unwrap();

    // 非层级实体不会被加载
    assert_eq!(ind.entities().count(), 4);
    assert_eq!(ind.get("OTHER", 2020), Observation::Missing);

    let res = agg.aggregate(&ind).unwrap();
    assert_eq!(res.value("RA", 2020), Some(30.0));
    assert_eq!(res.value("RB", 2020), Some(5.0));
    assert_eq!(res.value("WLD", 2020), Some(35.0));
    assert_eq!(res.value("RA", 2021), None);
    assert_eq!(res.value("WLD", 2021), None);
}

#[test]
fn test_coverage_boundary() {
    let h = Hierarchy::new(["C1", "C2", "C3"], [("R", vec!["C1", "C2", "C3"])]).unwrap();
    let two  = Indicator::new("X", "", "").with("C1", 2020, Some(1.0)).with("C2", 2020, Some(2.0));
    let one  = Indicator::new("X", "", "").with("C1", 2020, Some(1.0));

    let inclusive = CoverageAggregator::new(&h, CoverageThreshold::TWO_THIRDS);
    assert_eq!(inclusive.aggregate(&two).unwrap().value("R", 2020), Some(3.0));
    assert_eq!(inclusive.aggregate(&one).unwrap().value("R", 2020), None);

    let exclusive = CoverageAggregator::new(
        &h,
        CoverageThreshold::TWO_THIRDS.with_boundary(Boundary::Exclusive),
    );
    assert_eq!(exclusive.aggregate(&two).unwrap().value("R", 2020), None);
}

#[test]
fn test_missing_members_are_not_zero() {
    let h   = regions();
    let ind = Indicator::new("X", "", "")
        .with("C1", 2020, Some(10.0))
        .with("C2", 2020, Some(20.0));
    let res = CoverageAggregator::new(&h, CoverageThreshold::TWO_THIRDS).aggregate(&ind).unwrap();
    // RA 有值但 RB 缺失；WLD 1/2 不达标，不能把 RB 当 0 得到 30
    assert_eq!(res.value("RA", 2020), Some(30.0));
    assert_eq!(res.value("WLD", 2020), None);
}

#[test]
fn test_cycle_rejected_before_aggregation() {
    let cfg = HierarchyConfig::from_yaml_str(
        "base_entities: [C1]\ngroups:\n  A: [C1, B]\n  B: [C]\n  C: [A]\n",
    )
    .unwrap();
    match cfg.build_hierarchy() {
        Err(AggError::Cycle(ents)) => assert_eq!(ents, vec!["A", "B", "C"]),
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn test_aggregation_is_idempotent() {
    let h   = regions();
    let agg = CoverageAggregator::new(&h, CoverageThreshold::TWO_THIRDS);
    let a   = agg.aggregate(&population()).unwrap();
    let b   = agg.aggregate(&population()).unwrap();
    assert_eq!(a.table, b.table);
    assert_eq!(a.stats, b.stats);

    let writer = ContainerWriter::default();
    assert_eq!(
        writer.to_bytes(&a.to_indicator()).unwrap(),
        writer.to_bytes(&b.to_indicator()).unwrap(),
    );
}

#[test]
fn test_resave_is_byte_identical() {
    let dir   = tempfile::tempdir().unwrap();
    let store = IndicatorStore::open(dir.path()).unwrap();
    let mut ind = population();
    ind.set("C3", 2021, Observation::Invalid);
    store.save(&ind).unwrap();

    let path  = store.path_for("SP.POP.TOTL").unwrap();
    let first = std::fs::read(&path).unwrap();
    let back  = store.load("SP.POP.TOTL", &LoadFilter::all()).unwrap();
    assert_eq!(back, ind);
    assert_eq!(back.get("C3", 2021), Observation::Invalid);
    assert_eq!(back.get("C3", 2020), Observation::Missing);

    store.save(&back).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), first);
}

#[test]
fn test_selective_load_by_year() {
    let dir   = tempfile::tempdir().unwrap();
    let store = IndicatorStore::open(dir.path()).unwrap();
    store.save(&population()).unwrap();

    let ind = store
        .load("sp.pop.totl", &LoadFilter::all().with_entities(["C1"]).with_years(2021..=2021))
        .unwrap();
    assert_eq!(ind.entities().collect::<Vec<_>>(), vec!["C1"]);
    assert_eq!(ind.years().into_iter().collect::<Vec<_>>(), vec![2021]);
    assert_eq!(ind.get("C1", 2021), Observation::Present(10.0));
}
