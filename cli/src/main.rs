//! Headless front end for the screen recorder.
//!
//! Records the built-in test pattern for a fixed duration and encodes it,
//! printing controller notifications as they arrive.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use screenrec_capture::SyntheticSampler;
use screenrec_encoder::{all_file_formats, BuiltinBackend, CodecBackend, SinkKind, VideoFormat};
use screenrec_engine::{
    create_controller, JsonSettingsStore, MemorySettingsStore, Settings, SettingsStore,
};
use screenrec_ipc::{command_channel, ColorDepth, EngineCommand, EngineEvent, Rect, StopReason};

/// Bounds of the synthetic screen.
const SCREEN: Rect = Rect::new(0, 0, 1920, 1080);

/// screenrec - screen recorder
#[derive(Parser, Debug)]
#[command(name = "screenrec")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print notifications as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Settings file (defaults to the user configuration directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record the test pattern and encode it
    Record(RecordOptions),
    /// List output file formats and their codecs
    Formats,
    /// Print the saved settings
    Settings,
}

#[derive(Parser, Debug, Clone)]
struct RecordOptions {
    /// Capture area as X,Y,WIDTHxHEIGHT
    #[arg(long)]
    area: Option<Rect>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Color depth: bgra32, rgb24, rgb16, gray8
    #[arg(long)]
    depth: Option<ColorDepth>,

    /// Output file format (see `screenrec formats`)
    #[arg(short, long)]
    format: Option<String>,

    /// Output codec
    #[arg(long)]
    codec: Option<String>,

    /// Output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Recording length in seconds
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    duration: u64,

    /// Spill every frame to disk while recording
    #[arg(long)]
    disk_only: bool,

    /// Keep these options as the new saved settings
    #[arg(long)]
    save: bool,
}

impl RecordOptions {
    fn apply(&self, settings: &mut Settings) {
        if let Some(area) = self.area {
            settings.capture_area = area;
        }
        if let Some(fps) = self.fps {
            settings.frame_rate = fps;
        }
        if let Some(depth) = self.depth {
            settings.color_depth = depth;
        }
        if let Some(format) = &self.format {
            settings.file_format = format.clone();
        }
        if let Some(codec) = &self.codec {
            settings.codec = codec.clone();
        }
        if let Some(output) = &self.output {
            settings.output_path = output.clone();
        }
        if self.disk_only {
            settings.disk_only = true;
        }
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "screenrec=info,screenrec_engine=debug,screenrec_capture=info,screenrec_encoder=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn settings_store(path: Option<PathBuf>) -> Result<JsonSettingsStore> {
    match path {
        Some(path) => Ok(JsonSettingsStore::new(path)),
        None => JsonSettingsStore::open_default().context("Locating the settings file"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Commands::Record(options) => record(&options, cli.settings, cli.json),
        Commands::Formats => formats(cli.json),
        Commands::Settings => {
            let settings = settings_store(cli.settings)?.load();
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn record(options: &RecordOptions, settings_path: Option<PathBuf>, json: bool) -> Result<()> {
    let persisted = settings_store(settings_path)?;
    let mut settings = persisted.load();
    options.apply(&mut settings);

    let store: Arc<dyn SettingsStore> = if options.save {
        persisted.save(&settings).context("Saving settings")?;
        Arc::new(persisted)
    } else {
        Arc::new(MemorySettingsStore::new(settings))
    };

    let controller = create_controller(
        store,
        Arc::new(SyntheticSampler::new(SCREEN)),
        Arc::new(BuiltinBackend::new()),
    )?;
    let events = controller.subscribe();
    let (commands, rx) = command_channel();

    let runner = {
        let controller = Arc::clone(&controller);
        thread::Builder::new()
            .name("screenrec-controller".into())
            .spawn(move || controller.run(rx))
            .context("Starting the controller thread")?
    };

    info!(seconds = options.duration, "Recording");
    commands.send(EngineCommand::SetRecordingDuration(options.duration * 1000))?;
    commands.send(EngineCommand::StartCapture)?;

    let mut outcome = None;
    for event in events.iter() {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else if let Some(line) = describe(&event) {
            println!("{line}");
        }

        match event {
            EngineEvent::CaptureStopped {
                reason: StopReason::StartFailed,
                status,
            } => {
                outcome = Some(Err(status));
                commands.send(EngineCommand::Shutdown)?;
            }
            EngineEvent::EncodeFinished { status, .. } => {
                outcome = Some(if status.is_ok() { Ok(()) } else { Err(status) });
                commands.send(EngineCommand::Shutdown)?;
            }
            EngineEvent::Shutdown => break,
            _ => {}
        }
    }

    if runner.join().is_err() {
        bail!("Controller thread panicked");
    }

    match outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(status)) => bail!("Recording failed: {status} ({})", status.raw()),
        None => bail!("Controller stopped before the recording finished"),
    }
}

fn formats(json: bool) -> Result<()> {
    let backend = BuiltinBackend::new();
    let settings = Settings::default();
    let video = VideoFormat {
        width: settings.capture_area.width,
        height: settings.capture_area.height,
        depth: settings.color_depth,
        frame_rate: settings.frame_rate,
    };

    for format in all_file_formats(&backend) {
        let codecs = match SinkKind::select(&format, None) {
            Ok(kind) if kind.bypasses_codecs() => Vec::new(),
            _ => backend.codecs_for(&format, &video),
        };

        if json {
            let line = serde_json::json!({ "format": format, "codecs": codecs });
            println!("{line}");
        } else {
            let names: Vec<&str> = codecs.iter().map(|c| c.short_name.as_str()).collect();
            println!(
                "{:<14} {:<24} {}",
                format.short_name,
                format.pretty_name,
                if names.is_empty() { "-".to_string() } else { names.join(", ") }
            );
        }
    }
    Ok(())
}

/// One human readable line for the notifications worth showing.
fn describe(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::CaptureStarted => Some("Recording started".into()),
        EngineEvent::CaptureStopped { reason, status } => {
            Some(format!("{} ({status})", reason.message()))
        }
        EngineEvent::RecordingProgress(progress) => Some(format!(
            "  {} frames, {:.1}s, {:.1} fps",
            progress.frames,
            progress.elapsed_ms as f64 / 1000.0,
            progress.average_fps
        )),
        EngineEvent::EncodeStarted { total_frames } => {
            Some(format!("Encoding {total_frames} frames"))
        }
        EngineEvent::EncodeProgress {
            remaining, text, ..
        } if remaining % 10 == 0 => Some(format!("  {text}")),
        EngineEvent::EncodeFinished { status, path } => Some(match path {
            Some(path) => format!("Finished ({status}): {}", path.display()),
            None => format!("Finished ({status})"),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use screenrec_ipc::Status;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_record() {
        let cli = Cli::try_parse_from([
            "screenrec", "record", "--area", "10,20,320x240", "--fps", "15", "--depth", "rgb16",
            "-f", "gif", "-o", "/tmp/clip.gif", "-d", "5",
        ])
        .unwrap();

        let Commands::Record(options) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(options.area, Some(Rect::new(10, 20, 320, 240)));
        assert_eq!(options.depth, Some(ColorDepth::Rgb16));
        assert_eq!(options.duration, 5);

        let mut settings = Settings::default();
        options.apply(&mut settings);
        assert_eq!(settings.frame_rate, 15);
        assert_eq!(settings.file_format, "gif");
        assert_eq!(settings.output_path, PathBuf::from("/tmp/clip.gif"));
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert!(Cli::try_parse_from(["screenrec", "record", "-d", "0"]).is_err());
        assert!(Cli::try_parse_from(["screenrec", "record", "--area", "0,0,0x0"]).is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(&EngineEvent::EncodeFinished {
                status: Status::Ok,
                path: Some(PathBuf::from("/tmp/a.y4m")),
            }),
            Some("Finished (ok): /tmp/a.y4m".to_string())
        );
        assert_eq!(describe(&EngineEvent::Ready), None);
    }
}
