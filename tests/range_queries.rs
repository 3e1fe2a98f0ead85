use rand::Rng;
use test_log::test;
use tsdb_storage_engine::{BackgroundConfig, Config, Labels, LabelMatcher, Sample, StorageEngine, TimeSeries};

fn no_background(dir: &std::path::Path) -> Config {
    Config::new(dir).background(BackgroundConfig {
        enable: false,
        ..BackgroundConfig::default()
    })
}

#[test]
fn query_across_hot_and_cold_tiers_is_monotonic_and_complete() -> tsdb_storage_engine::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = no_background(dir.path()).block_size(120);
    let engine = StorageEngine::init(config)?;

    let labels = Labels::from_pairs([("__name__", "cpu")]);
    let t_start = 1_700_000_000_000i64;

    for i in 0..150 {
        engine.write(TimeSeries::with_samples(labels.clone(), vec![Sample::new(t_start + i * 1000, 100.0 + i as f64)]))?;
    }
    engine.flush()?;
    for i in 150..200 {
        engine.write(TimeSeries::with_samples(labels.clone(), vec![Sample::new(t_start + i * 1000, 100.0 + i as f64)]))?;
    }

    let result = engine.query(&[LabelMatcher::Equal { name: "__name__".into(), value: "cpu".into() }], t_start, t_start + 200_000)?;

    assert_eq!(1, result.len());
    let series = &result[0];
    assert_eq!(200, series.samples.len());

    for window in series.samples.windows(2) {
        assert!(window[0].timestamp < window[1].timestamp, "samples must be strictly monotonic");
    }
    for (i, sample) in series.samples.iter().enumerate() {
        assert_eq!(100.0 + i as f64, sample.value);
    }
    Ok(())
}

#[test]
fn compaction_merges_small_files_into_a_tier_two_file() -> tsdb_storage_engine::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = no_background(dir.path()).block_size(1);
    let engine = StorageEngine::init(config)?;

    let labels = Labels::from_pairs([("__name__", "compact_me")]);
    let t_start = 1_700_000_000_000i64;

    for i in 0..20 {
        engine.write(TimeSeries::with_samples(labels.clone(), vec![Sample::new(t_start + i, i as f64)]))?;
        engine.flush()?;
    }

    engine.compact()?;

    let result = engine.query(&[LabelMatcher::Equal { name: "__name__".into(), value: "compact_me".into() }], t_start, t_start + 1000)?;
    assert_eq!(1, result.len());
    assert_eq!(20, result[0].samples.len());

    assert!(dir.path().join("2").exists(), "tier-2 directory should exist after compaction");
    Ok(())
}

#[test]
fn time_range_filters_out_samples_outside_window() -> tsdb_storage_engine::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = StorageEngine::init(no_background(dir.path()))?;
    let labels = Labels::from_pairs([("__name__", "rand_metric")]);

    let mut rng = rand::rng();
    let mut samples = Vec::new();
    for _ in 0..64 {
        let ts = rng.random_range(0..100_000i64);
        samples.push(Sample::new(ts, rng.random_range(-1000.0..1000.0)));
    }
    samples.sort_by_key(|s| s.timestamp);
    samples.dedup_by_key(|s| s.timestamp);

    engine.write(TimeSeries::with_samples(labels.clone(), samples.clone()))?;

    let window_lo = 20_000;
    let window_hi = 60_000;
    let expected: Vec<_> = samples.iter().filter(|s| s.timestamp >= window_lo && s.timestamp <= window_hi).cloned().collect();

    let series = engine.read(&labels, window_lo, window_hi)?;
    assert_eq!(expected.len(), series.samples.len());
    for (a, b) in expected.iter().zip(series.samples.iter()) {
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.value, b.value);
    }
    Ok(())
}
