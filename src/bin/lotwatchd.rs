//! lotwatchd - parking occupancy and plate identity daemon
//!
//! This daemon:
//! 1. Loads configuration (file, defaults, environment overrides)
//! 2. Opens both frame sources, the spot layout and every backend; any failure
//!    here is fatal and nothing is started
//! 3. Runs the parking and plate pipelines on their own threads
//! 4. Keeps the plate log and the latest parking summary, with health lines
//!    every 5 seconds
//! 5. Writes periodic reports when a report directory is configured
//!
//! Operator input on stdin: `p` pauses, `r` resumes, `x` clears both pipelines'
//! state (spot statuses, plate cache and tracks), `q` quits. Ctrl-C quits.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use lotwatch::pipeline::{latest, LoopStats};
use lotwatch::{
    open_source, BackendRegistry, LotwatchConfig, OccupancySummary, ParkingPipeline,
    PipelineControl, PlateLog, PlatePipeline, Report, ReportWriter, SpotSampler,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const CONSUMER_POLL: Duration = Duration::from_millis(100);
const PLATE_LOG_LINES: usize = 1000;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "LOTWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Stop each pipeline after this many frames.
    #[arg(long)]
    frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = LotwatchConfig::load_from(args.config.as_deref())?;
    let registry = BackendRegistry::with_builtin();
    log::debug!("available backends: {}", registry.list().join(", "));

    // Parking pipeline
    let layout = config
        .parking
        .load_layout()
        .context("loading parking spot layout")?;
    log::info!("parking layout: {} spots", layout.len());
    let sampler = SpotSampler::new(
        layout,
        config.parking.sample_interval,
        config.parking.diff_ratio,
    )?;
    let classifier = registry.classifier(
        &config.parking.classifier.name,
        &config.parking.classifier.options,
    )?;
    let parking = ParkingPipeline::new(sampler, classifier);
    let parking_source =
        open_source(&config.parking.source).context("opening parking frame source")?;

    // Plate pipeline
    let plates = PlatePipeline::new(
        registry.object_detector(&config.plates.detector.name, &config.plates.detector.options)?,
        registry.tracker(&config.plates.tracker.name, &config.plates.tracker.options)?,
        registry.plate_detector(
            &config.plates.plate_detector.name,
            &config.plates.plate_detector.options,
        )?,
        registry.ocr(&config.plates.ocr.name, &config.plates.ocr.options)?,
    )
    .with_vehicle_classes(config.plates.vehicle_classes.clone());
    let plate_source = open_source(&config.plates.source).context("opening plate frame source")?;

    let mut reports = match &config.report.dir {
        Some(dir) => Some(ReportWriter::new(dir, config.report.interval)?),
        None => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let parking_control = PipelineControl::with_stop(stop.clone());
    let plate_control = PipelineControl::with_stop(stop.clone());
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .expect("error setting Ctrl-C handler");
    }
    spawn_operator_input(vec![parking_control.clone(), plate_control.clone()])?;

    let (parking_tx, parking_rx) = latest();
    let (plate_tx, plate_rx) = latest();
    let (event_tx, event_rx) = mpsc::channel();

    let frame_limit = args.frames;
    let parking_thread = std::thread::Builder::new()
        .name("parking".to_string())
        .spawn({
            let control = parking_control.clone();
            move || parking.run(parking_source, control, parking_tx, frame_limit)
        })?;
    let plate_thread = std::thread::Builder::new()
        .name("plates".to_string())
        .spawn({
            let control = plate_control.clone();
            move || plates.run(plate_source, control, plate_tx, event_tx, frame_limit)
        })?;

    log::info!(
        "lotwatchd running. parking={} plates={}",
        config.parking.source.location,
        config.plates.source.location
    );

    let mut plate_log = PlateLog::with_max_lines(PLATE_LOG_LINES);
    let mut summary: Option<OccupancySummary> = None;
    let mut parking_frames = 0u64;
    let mut plate_frames = 0u64;
    let mut vehicles_in_view = 0usize;
    let mut last_health_log = Instant::now();

    loop {
        if let Some(snapshot) = parking_rx.recv_timeout(CONSUMER_POLL) {
            parking_frames = snapshot.frame_index + 1;
            if snapshot.sampled && summary.as_ref() != Some(&snapshot.summary) {
                log::info!(
                    "parking: Available Spots: {:03}/{} | Occupancy Rate : {:.1}% | free: {}",
                    snapshot.summary.available,
                    snapshot.summary.total,
                    snapshot.summary.occupancy_rate(),
                    snapshot.summary.free_labels().join(" ")
                );
            }
            summary = Some(snapshot.summary);
        }
        if let Some(snapshot) = plate_rx.try_take() {
            plate_frames = snapshot.frame_index + 1;
            vehicles_in_view = snapshot.vehicles.len();
        }
        record_events(&event_rx, &mut plate_log);

        if let Some(writer) = reports.as_mut() {
            if let Err(err) = writer.write_if_due(Instant::now(), || {
                Report::build(SystemTime::now(), &plate_log, summary.as_ref())
            }) {
                log::warn!("report write failed: {:#}", err);
            }
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::info!(
                "health: parking frames={} dropped={} paused={} source_ok={} | plates frames={} dropped={} source_ok={} vehicles={} known={}",
                parking_frames,
                parking_rx.stats().dropped,
                parking_control.is_paused(),
                parking_control.is_source_healthy(),
                plate_frames,
                plate_rx.stats().dropped,
                plate_control.is_source_healthy(),
                vehicles_in_view,
                plate_log.vehicle_count()
            );
            last_health_log = Instant::now();
        }

        if stop.load(Ordering::SeqCst) {
            log::info!("shutdown requested, stopping pipelines...");
            break;
        }
        if parking_thread.is_finished() && plate_thread.is_finished() {
            log::info!("both pipelines finished");
            break;
        }
    }

    stop.store(true, Ordering::SeqCst);
    let parking_result = join_pipeline("parking", parking_thread);
    let plate_result = join_pipeline("plate", plate_thread);

    if let Some(snapshot) = parking_rx.try_take() {
        summary = Some(snapshot.summary);
    }
    record_events(&event_rx, &mut plate_log);
    if let Some(writer) = reports.as_mut() {
        writer.write(&Report::build(
            SystemTime::now(),
            &plate_log,
            summary.as_ref(),
        ))?;
        log::info!("final report written to {}", writer.dir().display());
    }

    parking_result?;
    plate_result?;
    Ok(())
}

fn record_events(events: &mpsc::Receiver<lotwatch::PlateEvent>, plate_log: &mut PlateLog) {
    for event in events.try_iter() {
        if plate_log.record(&event, SystemTime::now()) {
            if let Some(line) = plate_log.lines().last() {
                log::info!("{}", line);
            }
        }
    }
}

fn join_pipeline(name: &str, handle: JoinHandle<Result<LoopStats>>) -> Result<LoopStats> {
    let result = handle
        .join()
        .map_err(|_| anyhow!("{} pipeline thread panicked", name))?;
    match &result {
        Ok(stats) => log::info!(
            "{} pipeline: {} frames, {} rewinds, {} read errors",
            name,
            stats.frames,
            stats.rewinds,
            stats.read_errors
        ),
        Err(err) => log::error!("{} pipeline failed: {:#}", name, err),
    }
    result
}

/// Reads operator commands from stdin until EOF.
fn spawn_operator_input(controls: Vec<PipelineControl>) -> Result<()> {
    std::thread::Builder::new()
        .name("operator".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match line.trim() {
                    "p" => controls.iter().for_each(PipelineControl::pause),
                    "r" => controls.iter().for_each(PipelineControl::resume),
                    "x" => controls.iter().for_each(PipelineControl::request_reset),
                    "q" => {
                        controls.iter().for_each(PipelineControl::stop);
                        break;
                    }
                    "" => {}
                    other => log::warn!(
                        "unknown command '{}' (p=pause, r=resume, x=reset, q=quit)",
                        other
                    ),
                }
            }
        })?;
    Ok(())
}
