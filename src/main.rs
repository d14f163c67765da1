use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use loqa_recorder::audio::{AudioBackend, AudioBackendFactory, AudioFile};
use loqa_recorder::config::{expand_path, SourceKind};
use loqa_recorder::{pump_frames, Config, PumpStats, Recorder, RecorderState, RecordingSummary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-recorder")]
#[command(version, about = "Continuous WAV recorder with crash-safe headers")]
struct Cli {
    /// Config file (extension optional; missing file means defaults)
    #[arg(short, long, global = true, default_value = "config/loqa-recorder")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record from a tone or WAV source until duration, Ctrl+C, or the size cap
    Record(RecordArgs),
    /// Interactive start | stop | status | quit while a tone feeds the recorder
    Console,
    /// Print metadata of a recorded WAV file
    Inspect {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RecordArgs {
    /// Seconds to record (default: until Ctrl+C or the size cap)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Directory for rec_N.wav files
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Cap on PCM payload bytes (0 = unlimited)
    #[arg(short, long)]
    max_size: Option<u64>,

    /// Replay this WAV instead of generating a tone
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Tone frequency in Hz
    #[arg(short, long)]
    frequency: Option<f32>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;

    init_logging(&cfg.logging.level);
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Record(args) => {
            apply_record_overrides(&mut cfg, &args)?;
            record(cfg, args.duration.map(Duration::from_secs), args.json).await
        }
        Command::Console => console(cfg).await,
        Command::Inspect { file, json } => inspect(&file, json),
    }
}

fn apply_record_overrides(cfg: &mut Config, args: &RecordArgs) -> Result<()> {
    if let Some(dir) = &args.output_dir {
        cfg.recorder.output_directory = expand_path(&PathBuf::from(dir))?;
    }
    if let Some(max_size) = args.max_size {
        cfg.recorder.max_file_size_bytes = max_size;
    }
    if let Some(input) = &args.input {
        cfg.source.kind = SourceKind::File;
        cfg.source.input = Some(input.clone());
    }
    if let Some(frequency) = args.frequency {
        cfg.source.frequency_hz = frequency;
    }
    Ok(())
}

/// Recorder fed by a running audio source
struct Pipeline {
    recorder: Arc<Recorder>,
    backend: Box<dyn AudioBackend>,
    pump: JoinHandle<PumpStats>,
}

impl Pipeline {
    async fn start(cfg: &Config) -> Result<Self> {
        let recorder_config = cfg.recorder.clone();
        let recorder = tokio::task::spawn_blocking(move || Recorder::init(recorder_config))
            .await?
            .context("Failed to initialize recorder")?;
        let recorder = Arc::new(recorder);

        let backend_config = cfg.source.backend_config(&cfg.recorder.format);
        let mut backend = AudioBackendFactory::create(cfg.source.audio_source()?, backend_config)?;
        info!("Audio source: {}", backend.name());

        let audio_rx = backend.start().await?;

        let sink = Arc::clone(&recorder);
        let pump = tokio::task::spawn_blocking(move || pump_frames(audio_rx, sink.as_ref()));

        Ok(Self {
            recorder,
            backend,
            pump,
        })
    }

    async fn start_recording(&self) -> Result<()> {
        let recorder = Arc::clone(&self.recorder);
        tokio::task::spawn_blocking(move || recorder.start()).await??;
        Ok(())
    }

    /// Stop the session if one is open; `None` if there was nothing to stop
    async fn stop_recording(&self) -> Result<Option<RecordingSummary>> {
        if !matches!(
            self.recorder.get_state(),
            RecorderState::Recording | RecorderState::Error
        ) {
            return Ok(None);
        }
        let recorder = Arc::clone(&self.recorder);
        let summary = tokio::task::spawn_blocking(move || recorder.stop()).await??;
        Ok(Some(summary))
    }

    async fn shutdown(mut self) -> Result<(Arc<Recorder>, PumpStats)> {
        self.backend.stop().await?;
        let stats = self.pump.await?;
        Ok((self.recorder, stats))
    }
}

async fn record(cfg: Config, duration: Option<Duration>, json: bool) -> Result<()> {
    let pipeline = Pipeline::start(&cfg).await?;

    if pipeline.recorder.get_state() == RecorderState::Idle {
        pipeline.start_recording().await?;
    }

    match duration {
        Some(d) => info!("Recording for {}s. Press Ctrl+C to stop early", d.as_secs()),
        None => info!("Recording. Press Ctrl+C to stop"),
    }

    let deadline = async {
        match duration {
            Some(d) => sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = interval(Duration::from_millis(200));
    let mut source_done = false;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Duration reached");
                break;
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = poll.tick() => {
                if pipeline.pump.is_finished() {
                    info!("Audio source finished");
                    source_done = true;
                    break;
                }
                let state = pipeline.recorder.get_state();
                if state != RecorderState::Recording {
                    info!("Recorder left recording state ({})", state);
                    break;
                }
            }
        }
    }

    // Stop the recorder before the source so the file ends with the last
    // buffers the source produced
    let summary = pipeline.stop_recording().await?;
    if !source_done {
        info!("Stopping audio source...");
    }
    let (recorder, stats) = pipeline.shutdown().await?;
    let status = recorder.status();

    if json {
        let output = serde_json::json!({
            "summary": summary,
            "status": status,
            "frames": stats.frames,
            "dropped_frames": stats.dropped_frames,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match &summary {
            Some(s) => print_summary(s),
            None => {
                if let Some(filename) = &status.filename {
                    println!("Recording ended on size cap: {}", filename.display());
                    println!("  data:    {} bytes", status.data_size);
                }
            }
        }
        println!("  frames:  {} ({} dropped)", stats.frames, stats.dropped_frames);
    }

    if status.state == RecorderState::Error {
        warn!("Recording ended after storage errors; see log above");
    }

    Ok(())
}

fn print_summary(summary: &RecordingSummary) {
    println!("Saved {}", summary.filename.display());
    println!("  data:    {} bytes ({:.1}s)", summary.data_size, summary.duration_secs);
    println!("  file:    {} bytes", summary.bytes_written);
    if summary.dropped_bytes > 0 || summary.write_errors > 0 {
        println!(
            "  lost:    {} bytes dropped, {} write errors",
            summary.dropped_bytes, summary.write_errors
        );
    }
}

async fn console(mut cfg: Config) -> Result<()> {
    // The console drives sessions by hand
    cfg.recorder.auto_start = false;
    let pipeline = Pipeline::start(&cfg).await?;

    println!("Commands: start | stop | status | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "start" => match pipeline.start_recording().await {
                Ok(()) => {
                    if let Some(filename) = pipeline.recorder.get_current_filename() {
                        println!("Recording to {}", filename.display());
                    }
                }
                Err(e) => println!("Failed to start recording: {}", e),
            },
            "stop" => match pipeline.stop_recording().await {
                Ok(Some(summary)) => print_summary(&summary),
                Ok(None) => println!("Not recording"),
                Err(e) => println!("Failed to stop recording: {}", e),
            },
            "status" => {
                let status = pipeline.recorder.status();
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            "quit" | "exit" => break,
            other => println!("Unknown command: {} (start | stop | status | quit)", other),
        }
    }

    if let Some(summary) = pipeline.stop_recording().await? {
        print_summary(&summary);
    }
    pipeline.shutdown().await?;

    Ok(())
}

fn inspect(path: &std::path::Path, json: bool) -> Result<()> {
    let audio = AudioFile::open(path)?;

    if json {
        let output = serde_json::json!({
            "path": audio.path,
            "sample_rate": audio.sample_rate,
            "channels": audio.channels,
            "bits_per_sample": audio.bits_per_sample,
            "data_size": audio.data_size(),
            "duration_seconds": audio.duration_seconds,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", audio.path);
        println!("  format:   {}Hz, {} channels, {}-bit", audio.sample_rate, audio.channels, audio.bits_per_sample);
        println!("  data:     {} bytes", audio.data_size());
        println!("  duration: {:.2}s", audio.duration_seconds);
    }

    Ok(())
}
