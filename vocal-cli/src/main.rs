//! # Vocal Trainer - command-line front end
//!
//! Captures the microphone on a dedicated audio thread, resolves a pitch every
//! tick and runs one hold exercise against a target note.
//!
//! ## Architecture
//! - **Audio thread**: owns the capture stream and the pitch session
//! - **Main thread**: owns the exercise and its match tracker
//! - **Communication**: crossbeam channels for results and shutdown

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vocal_core::audio::{self, AudioSession};
use vocal_core::diagnostics::LogSink;
use vocal_core::exercise::{Exercise, ExerciseParams, ExerciseRegistry, ExerciseStatus, PitchHold};
use vocal_core::smoothing::PitchSmoother;
use vocal_core::tuning::{Note, nearest_note};
use vocal_core::{MatchPhase, PeriodicityMethod, PitchSession, ResolvedPitch, TrainerConfig};

/// Frequencies averaged for the live readout.
const SMOOTHING_WINDOW: usize = 5;
/// How long the main thread waits on the audio thread before giving up on a tick.
const RESULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Nsdf,
    Yin,
}

impl From<MethodArg> for PeriodicityMethod {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Nsdf => PeriodicityMethod::Nsdf,
            MethodArg::Yin => PeriodicityMethod::Yin,
        }
    }
}

/// Sing a note and hold it until the trainer hears a match.
#[derive(Debug, Parser)]
#[command(name = "vocal-trainer", version, about)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the effective configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Input device name (see --list-devices)
    #[arg(long)]
    device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Exercise to run
    #[arg(long, default_value = PitchHold::ID)]
    exercise: String,

    /// Target note, e.g. A3 or C#4; the root for interval exercises
    #[arg(long, default_value = "A3", conflicts_with = "target_hz")]
    target: String,

    /// Target frequency in Hz instead of a note name
    #[arg(long)]
    target_hz: Option<f32>,

    /// Half steps above the root for interval exercises
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    interval: i32,

    /// Allowed deviation as a fraction of the target frequency
    #[arg(long)]
    tolerance: Option<f32>,

    /// Time the note must be held, in milliseconds
    #[arg(long)]
    hold_ms: Option<f32>,

    /// Consecutive in-tolerance readings needed before time counts
    #[arg(long)]
    stable_readings: Option<usize>,

    /// Periodicity estimator paired with the spectral one
    #[arg(long, value_enum)]
    method: Option<MethodArg>,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Log a JSON diagnostic line per tick (visible with RUST_LOG=trace)
    #[arg(long)]
    diagnostics: bool,
}

impl Args {
    /// Layers the command-line overrides over the file (or default) configuration.
    fn trainer_config(&self) -> Result<TrainerConfig> {
        let mut config = match &self.config {
            Some(path) => TrainerConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => TrainerConfig::default(),
        };
        if let Some(device) = &self.device {
            config.input_device = Some(device.clone());
        }
        if let Some(ratio) = self.tolerance {
            config.tolerance.tolerance_ratio = ratio;
        }
        if let Some(hold_ms) = self.hold_ms {
            config.tolerance.required_matched_ms = hold_ms;
        }
        if let Some(readings) = self.stable_readings {
            config.tolerance.required_stable_readings = readings;
        }
        if let Some(method) = self.method {
            config.detector.periodicity = method.into();
        }
        config.validate()?;
        Ok(config)
    }

    fn target_frequency(&self) -> Result<f32> {
        match self.target_hz {
            Some(hz) => Ok(hz),
            None => {
                let note: Note = self.target.parse()?;
                Ok(note.frequency())
            }
        }
    }
}

/// What the audio thread reports back.
#[derive(Debug)]
enum WorkerEvent {
    Ready { device: String, sample_rate: u32 },
    Tick { pitch: Option<ResolvedPitch>, at: Duration },
    Failed(String),
}

/// Audio worker thread management structure.
#[derive(Debug)]
struct AudioWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    /// Spawns the audio thread. The capture stream and pitch session are built on
    /// that thread and never leave it.
    fn spawn(config: TrainerConfig, diagnostics: bool, events: Sender<WorkerEvent>) -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let thread_handle = thread::spawn(move || {
            if let Err(e) = run_worker(&config, diagnostics, &events, &shutdown_rx) {
                error!("audio thread stopped: {e:#}");
                let _ = events.send(WorkerEvent::Failed(format!("{e:#}")));
            }
            debug!("audio thread finished");
        });
        Self {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        }
    }

    fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("audio thread panicked during shutdown");
            }
        }
    }
}

fn run_worker(
    config: &TrainerConfig,
    diagnostics: bool,
    events: &Sender<WorkerEvent>,
    shutdown_rx: &Receiver<()>,
) -> Result<()> {
    let mut capture = AudioSession::start(config.input_device.as_deref(), config.buffer_size)?;
    config.detector.validate_for_sample_rate(capture.sample_rate())?;

    let mut session = PitchSession::new(config.detector.clone())?;
    if diagnostics {
        session = session.with_diagnostics(LogSink);
    }

    events
        .send(WorkerEvent::Ready {
            device: capture.device_name().to_string(),
            sample_rate: capture.sample_rate(),
        })
        .map_err(|_| anyhow!("result channel closed"))?;

    let tick = Duration::from_millis(config.tick_interval_ms);
    let started = Instant::now();
    loop {
        crossbeam_channel::select! {
            recv(shutdown_rx) -> _ => {
                debug!("audio thread received shutdown signal");
                break;
            },
            default(tick) => {},
        }

        let Some(pitch) = session.poll(&mut capture, tick) else {
            continue;
        };
        let event = WorkerEvent::Tick {
            pitch,
            at: started.elapsed(),
        };
        if events.send(event).is_err() {
            break;
        }
    }

    capture.stop();
    Ok(())
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_devices {
        for name in audio::list_input_devices()? {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = args.trainer_config()?;
    if let Some(path) = &args.write_config {
        config
            .save(path)
            .with_context(|| format!("writing config to {}", path.display()))?;
        info!("configuration written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let registry = ExerciseRegistry::with_builtin();
    let params = ExerciseParams {
        target_hz: args.target_frequency()?,
        semitones: args.interval,
        tolerance: config.tolerance.clone(),
    };
    let mut exercise = registry.create(&args.exercise, &params).with_context(|| {
        format!(
            "available exercises: {}",
            registry.ids().collect::<Vec<_>>().join(", ")
        )
    })?;

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let worker = AudioWorker::spawn(config, args.diagnostics, events_tx);

    let outcome = run_exercise(
        exercise.as_mut(),
        &events_rx,
        Duration::from_secs(args.timeout_secs),
    );
    exercise.stop();
    worker.shutdown();

    if outcome? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Feeds worker results into the exercise until it completes or time runs out.
///
/// Returns whether the exercise was completed.
fn run_exercise(
    exercise: &mut dyn Exercise,
    events: &Receiver<WorkerEvent>,
    timeout: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut smoother = PitchSmoother::new(SMOOTHING_WINDOW);
    let mut last_phase = MatchPhase::Idle;
    let mut last_decile = 0;

    loop {
        if Instant::now() >= deadline {
            warn!("no match within {} s", timeout.as_secs());
            return Ok(false);
        }

        let event = match events.recv_timeout(RESULT_TIMEOUT) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                warn!("no audio for {} s", RESULT_TIMEOUT.as_secs());
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("audio thread exited unexpectedly"));
            }
        };

        match event {
            WorkerEvent::Ready {
                device,
                sample_rate,
            } => {
                info!("listening on {device} at {sample_rate} Hz");
                info!("{}", exercise.describe());
                exercise.start();
            }
            WorkerEvent::Failed(reason) => return Err(anyhow!(reason)),
            WorkerEvent::Tick { pitch, at } => {
                let heard = smoother.push(pitch.as_ref().map(|p| p.frequency));
                let status = exercise.on_pitch(pitch.as_ref(), at);
                let update = match status {
                    ExerciseStatus::Stopped => continue,
                    ExerciseStatus::Completed(update) => {
                        info!("matched! held for {:.0} ms", update.accumulated_ms);
                        return Ok(true);
                    }
                    ExerciseStatus::Listening(update) => update,
                };

                if let Some(hz) = heard {
                    match nearest_note(hz) {
                        Some((note, cents)) => debug!(
                            "heard {hz:.1} Hz ({note} {cents:+.0} cents), {:+.0} cents from target",
                            update.cents_from_target.unwrap_or_default()
                        ),
                        None => debug!("heard {hz:.1} Hz"),
                    }
                }

                if update.phase != last_phase {
                    match update.phase {
                        MatchPhase::Accumulating => info!("on pitch, keep holding"),
                        MatchPhase::Idle => info!("lost the note"),
                        MatchPhase::Matched => {}
                    }
                    last_phase = update.phase;
                }

                let decile = (update.progress * 10.0) as u32;
                if decile > last_decile {
                    info!("{}% held", decile * 10);
                    last_decile = decile;
                }
            }
        }
    }
}
