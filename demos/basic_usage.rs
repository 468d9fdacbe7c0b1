//! # indicator-agg-engine 使用案例
//!
//! 1. 建立指标存储并写入两个指标
//! 2. 从 YAML 构建分类层级
//! 3. 单指标聚合，查看层级顺序下的结果
//! 4. 测量并写回模式跑完整一遍，打印吞吐量报告
//! 5. 从输出存储读回聚合结果

use std::time::Duration;

use indicator_agg_engine::{
    aggregator::CoverageAggregator,
    config::HierarchyConfig,
    indicator::{Indicator, LoadFilter, Observation},
    profiler::{ProfileSettings, RunMode, ThroughputProfiler},
    store::{IndicatorSource, IndicatorStore},
};

const HIERARCHY: &str = r#"
threshold: "2/3"
groups:
  REGA: [C1, C2, C3]
  REGB: [C4]
world: WLD
indicators:
  exclude: [XX.IGNORED]
"#;

fn main() -> indicator_agg_engine::Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   indicator-agg-engine 演示                               ");
    println!("═══════════════════════════════════════════════════════════\n");

    let workdir = tempfile::tempdir()?;
    let input   = workdir.path().join("data");
    let output  = workdir.path().join("aggregates");

    // =========================================================================
    // 1. 指标存储
    // =========================================================================
    println!("【1】写入指标到 {} ...", input.display());
    let store = IndicatorStore::open(&input)?;

    let mut pop = Indicator::new("SP.POP.TOTL", "Population, total", "people")
        .with("C1", 2020, Some(10.0))
        .with("C2", 2020, Some(20.0))
        .with("C3", 2020, None)
        .with("C4", 2020, Some(5.0))
        .with("C1", 2021, Some(11.0));
    pop.set("C2", 2021, Observation::parse(".."));
    pop.set("C4", 2021, Observation::parse("n/a?"));
    store.save(&pop)?;

    let gdp = Indicator::new("NY.GDP.MKTP.CD", "GDP (current US$)", "US$")
        .with("C1", 2020, Some(1.5e12))
        .with("C2", 2020, Some(2.5e12))
        .with("C3", 2020, Some(0.5e12))
        .with("C4", 2020, Some(3.0e11));
    store.save(&gdp)?;
    store.save(&Indicator::new("XX.IGNORED", "", "").with("C1", 2020, Some(1.0)))?;

    println!("    indicators = {:?}\n", store.list_indicators()?);

    // =========================================================================
    // 2. 分类层级
    // =========================================================================
    println!("【2】构建分类层级 ...");
    let cfg       = HierarchyConfig::from_yaml_str(HIERARCHY)?;
    let hierarchy = cfg.build_hierarchy()?;
    for (level, entities) in hierarchy.all_entities_by_level() {
        println!("    level {level}: {entities:?}");
    }
    println!();

    // =========================================================================
    // 3. 单指标聚合
    // =========================================================================
    println!("【3】聚合 SP.POP.TOTL ...");
    let aggregator = CoverageAggregator::new(&hierarchy, cfg.threshold()?);
    let loaded     = store.load("SP.POP.TOTL", &aggregator.load_filter())?;
    let result     = aggregator.aggregate(&loaded)?;
    for year in &result.years {
        for entity in ["REGA", "REGB", "WLD"] {
            println!("    {entity:<5} {year}: {:?}", result.value(entity, *year));
        }
    }
    println!(
        "    coverage failures = {}, invalid raw values = {}\n",
        result.stats.coverage_failures, result.stats.invalid_values
    );

    // =========================================================================
    // 4. 测量并写回
    // =========================================================================
    println!("【4】测量并写回 ...");
    let settings = ProfileSettings {
        budget: Some(Duration::from_secs(60)),
        ..ProfileSettings::from_config(&cfg)?
    }
    .with_mode(RunMode::MeasureAndPersist(output.clone()));
    let report = ThroughputProfiler::new(&hierarchy, settings).run(&store)?;
    println!("{report}\n");

    // =========================================================================
    // 5. 读回聚合结果
    // =========================================================================
    println!("【5】从 {} 读回 ...", output.display());
    let aggregates = IndicatorStore::open(&output)?;
    let world = aggregates.load(
        "NY.GDP.MKTP.CD",
        &LoadFilter::all().with_entities(["WLD"]),
    )?;
    println!("    WLD 2020 GDP = {:?}", world.get("WLD", 2020));

    println!("\n✓ 演示完成");
    Ok(())
}
