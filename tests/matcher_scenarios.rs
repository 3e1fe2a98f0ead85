use test_log::test;
use tsdb_storage_engine::{BackgroundConfig, Config, Labels, LabelMatcher, Sample, StorageEngine, TimeSeries};

fn no_background(dir: &std::path::Path) -> Config {
    Config::new(dir).background(BackgroundConfig {
        enable: false,
        ..BackgroundConfig::default()
    })
}

fn write_one(engine: &StorageEngine, labels: Labels, ts: i64) -> tsdb_storage_engine::Result<()> {
    engine.write(TimeSeries::with_samples(labels, vec![Sample::new(ts, 1.0)]))
}

#[test]
fn not_equal_prod_returns_dev_and_absent_env() -> tsdb_storage_engine::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = StorageEngine::init(no_background(dir.path()))?;

    write_one(&engine, Labels::from_pairs([("metric", "up"), ("env", "prod")]), 1000)?;
    write_one(&engine, Labels::from_pairs([("metric", "up"), ("env", "dev")]), 1000)?;
    write_one(&engine, Labels::from_pairs([("metric", "up")]), 1000)?;

    let result = engine.query(
        &[
            LabelMatcher::Equal { name: "metric".into(), value: "up".into() },
            LabelMatcher::NotEqual { name: "env".into(), value: "prod".into() },
        ],
        0,
        2000,
    )?;

    assert_eq!(2, result.len());
    let envs: Vec<Option<&str>> = result.iter().map(|s| s.labels.get("env")).collect();
    assert!(envs.contains(&Some("dev")));
    assert!(envs.contains(&None));
    Ok(())
}

#[test]
fn not_equal_empty_string_excludes_absent_env() -> tsdb_storage_engine::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = StorageEngine::init(no_background(dir.path()))?;

    write_one(&engine, Labels::from_pairs([("metric", "up"), ("env", "prod")]), 1000)?;
    write_one(&engine, Labels::from_pairs([("metric", "up"), ("env", "dev")]), 1000)?;
    write_one(&engine, Labels::from_pairs([("metric", "up")]), 1000)?;

    let result = engine.query(
        &[
            LabelMatcher::Equal { name: "metric".into(), value: "up".into() },
            LabelMatcher::NotEqual { name: "env".into(), value: String::new() },
        ],
        0,
        2000,
    )?;

    assert_eq!(2, result.len());
    for series in &result {
        assert!(series.labels.get("env").is_some_and(|v| !v.is_empty()));
    }
    Ok(())
}

#[test]
fn forced_collision_never_leaks_samples_across_series() -> tsdb_storage_engine::Result<()> {
    tsdb_storage_engine::label::set_series_id_hasher_for_test(|_| 99);
    let dir = tempfile::tempdir()?;
    let engine = StorageEngine::init(no_background(dir.path()))?;

    write_one(&engine, Labels::from_pairs([("__name__", "a")]), 1000)?;

    let result = engine.read(&Labels::from_pairs([("__name__", "b")]), 0, 2000);
    tsdb_storage_engine::label::reset_series_id_hasher_for_test();

    let series = result?;
    assert!(series.samples.is_empty());
    Ok(())
}
