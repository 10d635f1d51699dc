// Tue Jan 13 2026 - Alex

use anyhow::{bail, Context, Result};
use capabilities_cache::{
    cache::{Envelope, TimePeriod},
    config::CacheConfig,
    controller::{CacheUpdateHooks, UpdateCoordinator},
    datasource::{
        CompositePhenomenonRecord, FeatureRecord, InMemoryDatasource, ObservationRecord, RelatedFeatureRecord,
        ResultTemplateRecord, SensorRecord, SessionFactory,
    },
    events::{ChangeEventBridge, EventBus},
    utils::logging::{init_from_env, LoggingUtils},
    CacheStore,
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const REBUILD_WAIT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author = "Alex")]
#[command(version = "1.0.0")]
#[command(about = "Capabilities cache controller demo over an in-memory observation store", long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minutes between scheduled rebuilds
    #[arg(short, long)]
    interval: Option<u64>,

    #[arg(short, long)]
    workers: Option<usize>,

    /// Delete this sensor after the first rebuild and wait for the cache to follow
    #[arg(long)]
    delete_sensor: Option<String>,

    /// Write the final cache snapshot here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CacheConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(minutes) = args.interval {
        config.update_interval_minutes = minutes;
    }
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    config.validate()?;

    if args.verbose > 0 {
        LoggingUtils::init_logger(LoggingUtils::level_from_verbosity(args.verbose));
    } else {
        init_from_env(LoggingUtils::level_from_str(&config.log_level));
    }

    if !atty::is(atty::Stream::Stdout) {
        colored::control::set_override(false);
    }

    println!("{}", "Capabilities Cache Controller".cyan().bold());
    println!("{}", "=".repeat(50).cyan());
    println!(
        "{} Interval: {} min, workers: {}",
        "[*]".blue(),
        config.update_interval_minutes,
        config.worker_threads
    );

    let datasource = Arc::new(seed_datasource()?);
    let bus = Arc::new(EventBus::new());
    datasource.attach_event_bus(bus.clone());

    let factory: Arc<dyn SessionFactory> = datasource.clone();
    let cache = Arc::new(CacheStore::new());
    let coordinator = UpdateCoordinator::new(factory, cache.clone(), &config)?;
    let hooks: Arc<dyn CacheUpdateHooks> = coordinator.clone();
    let bridge = ChangeEventBridge::new(bus, hooks)?;

    let start_time = Instant::now();
    coordinator.start()?;
    wait_for_runs(&coordinator, 1)?;
    print_status(&coordinator, &cache);
    println!(
        "{} Initial rebuild complete in {:.2}s",
        "[+]".green(),
        start_time.elapsed().as_secs_f64()
    );

    if let Some(procedure) = &args.delete_sensor {
        if !datasource.delete_sensor(procedure) {
            eprintln!("{} Unknown sensor: {}", "[!]".red(), procedure);
        } else {
            println!("{} Deleted sensor {}, waiting for cache", "[*]".blue(), procedure);
            let deadline = Instant::now() + REBUILD_WAIT;
            while cache.has_procedure(procedure) {
                if Instant::now() >= deadline {
                    bail!("cache still lists {} after {:?}", procedure, REBUILD_WAIT);
                }
                thread::sleep(Duration::from_millis(20));
            }
            coordinator.wait_for_update();
            print_status(&coordinator, &cache);
        }
    }

    let json = cache.snapshot().to_json()?;
    match &args.output {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("writing {}", path.display()))?;
            println!("{} Snapshot saved to: {}", "[+]".green(), path.display());
        }
        None => println!("{}", json),
    }

    bridge.shutdown();
    coordinator.cleanup();
    println!("{} Shut down after {} rebuild(s)", "[+]".green(), coordinator.completed_runs());
    Ok(())
}

fn wait_for_runs(coordinator: &UpdateCoordinator, runs: u64) -> Result<()> {
    let deadline = Instant::now() + REBUILD_WAIT;
    while coordinator.completed_runs() < runs {
        if Instant::now() >= deadline {
            bail!("no cache rebuild finished within {:?}", REBUILD_WAIT);
        }
        thread::sleep(Duration::from_millis(20));
    }
    if !coordinator.is_initialized() {
        bail!("initial cache rebuild failed (health: {})", coordinator.health());
    }
    Ok(())
}

fn print_status(coordinator: &UpdateCoordinator, cache: &CacheStore) {
    let health = coordinator.health().to_string();
    println!("{}", "Cache Status".cyan().bold());
    println!("{}", "-".repeat(40).cyan());
    println!("  Health: {}", health.green());
    println!("  Procedures: {}", cache.procedures().len().to_string().green());
    println!("  Offerings: {}", cache.offerings().len().to_string().green());
    println!(
        "  Observable properties: {}",
        cache.observable_properties().len().to_string().green()
    );
    println!("  Features: {}", cache.features_of_interest().len().to_string().green());

    if let Some(report) = coordinator.last_report() {
        println!("  Last rebuild: {:.2}s at {}", report.duration.as_secs_f64(), report.finished_at);
        for error in &report.errors {
            println!("  {} {}", "[!]".yellow(), error);
        }
    }
    println!();
}

fn seed_datasource() -> Result<InMemoryDatasource> {
    let ds = InMemoryDatasource::new();
    let origin = Utc
        .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
        .single()
        .context("invalid demo start time")?;

    ds.insert_sensor(
        SensorRecord::new("urn:ogc:procedure:weather-station", "http://www.opengis.net/sensorml/2.0")
            .with_offering("urn:ogc:offering:weather")
            .with_observable_property("urn:ogc:property:air-temperature")
            .with_observable_property("urn:ogc:property:wind-speed"),
    );
    ds.insert_sensor(
        SensorRecord::new("urn:ogc:procedure:thermometer-1", "http://www.opengis.net/sensorml/2.0")
            .with_offering("urn:ogc:offering:weather")
            .with_observable_property("urn:ogc:property:air-temperature")
            .with_parent("urn:ogc:procedure:weather-station"),
    );
    ds.insert_sensor(
        SensorRecord::new("urn:ogc:procedure:river-gauge", "http://www.opengis.net/sensorml/2.0")
            .with_offering("urn:ogc:offering:hydrology")
            .with_observable_property("urn:ogc:property:water-level"),
    );

    ds.insert_feature(FeatureRecord::new("urn:ogc:feature:region", None));
    ds.insert_feature(
        FeatureRecord::new("urn:ogc:feature:station-site", Some(Envelope::point(4326, 7.65, 51.93)))
            .with_parent("urn:ogc:feature:region"),
    );
    ds.insert_feature(
        FeatureRecord::new("urn:ogc:feature:river-site", Some(Envelope::point(4326, 7.61, 51.96)))
            .with_parent("urn:ogc:feature:region"),
    );

    let readings = [
        ("urn:ogc:procedure:weather-station", "urn:ogc:offering:weather", "urn:ogc:property:wind-speed", "urn:ogc:feature:station-site"),
        ("urn:ogc:procedure:thermometer-1", "urn:ogc:offering:weather", "urn:ogc:property:air-temperature", "urn:ogc:feature:station-site"),
        ("urn:ogc:procedure:river-gauge", "urn:ogc:offering:hydrology", "urn:ogc:property:water-level", "urn:ogc:feature:river-site"),
    ];
    for (i, (procedure, offering, property, feature)) in readings.iter().enumerate() {
        for hour in 0..3 {
            let time = origin + ChronoDuration::hours(hour) + ChronoDuration::minutes(i as i64);
            ds.insert_observation(ObservationRecord {
                identifier: format!("urn:ogc:observation:{}-{}", i, hour),
                procedure: procedure.to_string(),
                offering: offering.to_string(),
                observable_property: property.to_string(),
                feature: feature.to_string(),
                phenomenon_time: TimePeriod::instant(time),
            });
        }
    }

    ds.insert_result_template(ResultTemplateRecord {
        identifier: "urn:ogc:template:river-level".to_string(),
        offering: "urn:ogc:offering:hydrology".to_string(),
        procedure: "urn:ogc:procedure:river-gauge".to_string(),
        observable_property: "urn:ogc:property:water-level".to_string(),
    });
    ds.add_related_feature(RelatedFeatureRecord {
        identifier: "urn:ogc:feature:region".to_string(),
        role: "sampledFeature".to_string(),
        offerings: vec!["urn:ogc:offering:weather".to_string(), "urn:ogc:offering:hydrology".to_string()],
    });
    ds.add_composite_phenomenon(CompositePhenomenonRecord {
        identifier: "urn:ogc:property:weather".to_string(),
        components: vec![
            "urn:ogc:property:air-temperature".to_string(),
            "urn:ogc:property:wind-speed".to_string(),
        ],
    });
    ds.set_feature_of_interest_types(
        std::iter::once("http://www.opengis.net/def/samplingFeatureType/OGC-OM/2.0/SF_SamplingPoint".to_string())
            .collect(),
    );

    Ok(ds)
}
