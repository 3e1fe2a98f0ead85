use test_log::test;
use tsdb_storage_engine::{BackgroundConfig, Config, Labels, Sample, StorageEngine, TimeSeries};

fn no_background(dir: &std::path::Path) -> Config {
    Config::new(dir).background(BackgroundConfig {
        enable: false,
        ..BackgroundConfig::default()
    })
}

#[test]
fn write_close_reopen_read_survives_restart() -> tsdb_storage_engine::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let engine = StorageEngine::init(no_background(dir.path()))?;
        let labels = Labels::from_pairs([("__name__", "cpu"), ("host", "h1")]);
        engine.write(TimeSeries::with_samples(labels, vec![Sample::new(1000, 1.0)]))?;
        engine.close()?;
    }

    let engine = StorageEngine::init(no_background(dir.path()))?;
    let labels = Labels::from_pairs([("__name__", "cpu"), ("host", "h1")]);
    let series = engine.read(&labels, 0, 2000)?;

    assert_eq!(1, series.samples.len());
    assert_eq!(1000, series.samples[0].timestamp);
    assert_eq!(1.0, series.samples[0].value);
    Ok(())
}

#[test]
fn crash_before_flush_is_recovered_from_wal() -> tsdb_storage_engine::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        // No `close()` call: simulates a crash after the WAL append but
        // before any flush. Dropping the engine leaves the WAL on disk
        // un-truncated.
        let engine = StorageEngine::init(no_background(dir.path()))?;
        let labels = Labels::from_pairs([("__name__", "mem")]);
        engine.write(TimeSeries::with_samples(labels, vec![Sample::new(500, 42.0), Sample::new(1500, 43.0)]))?;
    }

    let engine = StorageEngine::init(no_background(dir.path()))?;
    let labels = Labels::from_pairs([("__name__", "mem")]);
    let series = engine.read(&labels, 0, 2000)?;

    assert_eq!(2, series.samples.len());
    assert_eq!(vec![(500, 42.0), (1500, 43.0)], series.samples.iter().map(|s| (s.timestamp, s.value)).collect::<Vec<_>>());
    Ok(())
}
