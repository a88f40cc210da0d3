//! Field-test harness: run the listening engine against the real microphone
//! and print detections as they happen.
//!
//! ```text
//! fieldtest [--device NAME] [--db PATH] [--rate HZ] [--seconds N]
//!           [--duration SECS] [--score-threshold T] [--labels FILE]
//! ```
//!
//! Without `--labels` a small built-in table is used, and the classifier is
//! the silent stub, so this mostly exercises capture, framing, extraction,
//! and the event plumbing. Point `--labels` at a BirdNET label file to check
//! table parsing against real data.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use aria_core::{
    classify::stub::StubClassifier,
    store::SqliteStore,
    AriaEngine, ClassifierHandle, EventStore, GateConfig, LabelTable, ListenerConfig, Result,
};
use aria_core::dsp::SpectrogramConfig;

struct Args {
    device: Option<String>,
    db: Option<String>,
    rate: u32,
    seconds: u32,
    duration_secs: u64,
    score_threshold: f32,
    labels: Option<String>,
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut args = Args {
        device: None,
        db: None,
        rate: 48_000,
        seconds: 3,
        duration_secs: 30,
        score_threshold: 0.3,
        labels: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .ok_or_else(|| format!("{name} requires a value"))
        };
        match flag.as_str() {
            "--device" => args.device = Some(value("--device")?),
            "--db" => args.db = Some(value("--db")?),
            "--rate" => {
                args.rate = value("--rate")?
                    .parse()
                    .map_err(|e| format!("--rate: {e}"))?;
            }
            "--seconds" => {
                args.seconds = value("--seconds")?
                    .parse()
                    .map_err(|e| format!("--seconds: {e}"))?;
            }
            "--duration" => {
                args.duration_secs = value("--duration")?
                    .parse()
                    .map_err(|e| format!("--duration: {e}"))?;
            }
            "--score-threshold" => {
                args.score_threshold = value("--score-threshold")?
                    .parse()
                    .map_err(|e| format!("--score-threshold: {e}"))?;
            }
            "--labels" => args.labels = Some(value("--labels")?),
            other => return Err(format!("unknown flag: {other}")),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!(
                "usage: fieldtest [--device NAME] [--db PATH] [--rate HZ] [--seconds N] \
                 [--duration SECS] [--score-threshold T] [--labels FILE]"
            );
            std::process::exit(2);
        }
    };

    for device in aria_core::audio::device::list_input_devices() {
        info!(
            name = device.name.as_str(),
            default = device.is_default,
            "input device"
        );
    }

    let labels = Arc::new(match &args.labels {
        Some(path) => LabelTable::from_label_lines(&std::fs::read_to_string(path)?)?,
        None => LabelTable::from_label_lines(
            "Parus major_Great Tit\n\
             Cyanistes caeruleus_Eurasian Blue Tit\n\
             Pica pica_Eurasian Magpie",
        )?,
    });
    info!(labels = labels.len(), "label table loaded");

    let store: Arc<SqliteStore> = Arc::new(match &args.db {
        Some(path) => SqliteStore::open(path)?,
        None => SqliteStore::open_in_memory()?,
    });

    let config = ListenerConfig {
        sample_rate: args.rate,
        frame_seconds: args.seconds,
        gate: GateConfig {
            score_threshold: args.score_threshold,
            ..GateConfig::default()
        },
        spectrogram: SpectrogramConfig::birdnet_default(args.rate),
        ..ListenerConfig::default()
    };

    let engine = AriaEngine::new(
        config,
        ClassifierHandle::new(StubClassifier::silent(labels.len())),
        Arc::clone(&labels),
        Arc::clone(&store) as Arc<dyn EventStore>,
    );

    engine.warm_up()?;

    let mut detections = engine.subscribe_detections();
    let mut activity = engine.subscribe_activity();

    engine.start_with_device(args.device.clone()).await?;
    info!(duration_secs = args.duration_secs, "listening");

    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = detections.recv() => match event {
                    Ok(event) => {
                        for d in &event.detections {
                            println!(
                                "[{}] {} ({}) score={:.3} session={}{}",
                                event.seq,
                                d.name,
                                d.name_localized,
                                d.score,
                                d.session_key,
                                if d.new_session { " NEW" } else { "" },
                            );
                        }
                    }
                    Err(_) => break,
                },
                event = activity.recv() => match event {
                    Ok(event) => {
                        // one level line per second at the default chunking
                        if event.seq % 50 == 0 {
                            info!(rms = event.rms, "input level");
                        }
                    }
                    Err(_) => break,
                },
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;
    engine.stop()?;
    printer.abort();

    let snap = engine.pipeline_diagnostics_snapshot();
    println!(
        "samples_in={} frames={} processed={} detections={} clips={} sessions={}",
        snap.samples_in,
        snap.frames_assembled,
        snap.frames_processed,
        snap.detections_accepted,
        snap.clips_persisted,
        snap.sessions_started,
    );
    for session in store.list_sessions()? {
        println!(
            "session {}: {} ({}) peak={:.3} clips={}",
            session.key,
            session.name,
            session.name_localized,
            session.score,
            session.clip_ids.len(),
        );
    }

    Ok(())
}
