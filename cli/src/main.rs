use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sketchpad::action::BitmapId;
use sketchpad::engine::EngineCore;
use sketchpad::error::EngineError;
use sketchpad::event::EngineEvent;
use sketchpad::geom::Point;
use sketchpad::input::{PointerEvent, PointerPhase, Target};
use sketchpad::options::EngineConfig;
use sketchpad::recording::RecordingSurface;
use tracing_subscriber::EnvFilter;


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("step {step} failed: {source}")]
    Step { step: usize, source: EngineError },
    #[error("final render failed: {0}")]
    Render(#[source] EngineError),
}

#[derive(Parser, Debug)]
#[command(name = "sketchpad", about = "Drive the sketchpad drawing engine headlessly")]
struct Cli {
    /// Surface width in CSS pixels. Overrides the script's config.
    #[arg(long, env = "SKETCHPAD_WIDTH")]
    width: Option<f64>,

    /// Surface height in CSS pixels. Overrides the script's config.
    #[arg(long, env = "SKETCHPAD_HEIGHT")]
    height: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a JSON script of tool, pointer and history steps through the engine.
    Replay {
        script: PathBuf,

        #[arg(long, value_enum, default_value_t = Output::Calls)]
        output: Output,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Draw calls of the final frame.
    Calls,
    /// Committed history entries.
    History,
    /// Every event emitted while replaying.
    Events,
}

/// A replay script: optional engine config plus ordered steps.
#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    config: Value,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Tool {
        kind: String,
        #[serde(default)]
        options: Value,
    },
    /// Without a target the press is hit-tested like a single-canvas host.
    Pointer {
        #[serde(default)]
        target: Option<Target>,
        phase: PointerPhase,
        position: Point,
        #[serde(default)]
        movement: Point,
    },
    Undo,
    Redo,
    UndoAll,
    Clear,
    Viewport {
        pan_x: f64,
        pan_y: f64,
        zoom: f64,
    },
    PlaceImage {
        bitmap: u64,
        center: Point,
        width: f64,
        height: f64,
    },
    SaveCheckpoint,
    LoadCheckpoint {
        index: usize,
    },
}

struct Replay {
    core: EngineCore,
    surface: RecordingSurface,
    events: Vec<EngineEvent>,
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let Cli { width, height, command } = Cli::parse();
    match command {
        Command::Replay { script, output } => run_replay(&script, output, width, height),
    }
}

fn run_replay(path: &Path, output: Output, width: Option<f64>, height: Option<f64>) -> Result<(), CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let script: Script = serde_json::from_str(&text)?;

    let mut config = EngineConfig::from_value(&script.config);
    if let Some(width) = positive(width, "width") {
        config.width = width;
    }
    if let Some(height) = positive(height, "height") {
        config.height = height;
    }

    let result = replay(script.steps, config)?;
    tracing::info!(
        events = result.events.len(),
        history = result.core.history().len(),
        "replay finished"
    );
    match output {
        Output::Calls => print_json(&result.surface.frame()),
        Output::History => print_json(&result.core.history().committed()),
        Output::Events => print_json(&result.events),
    }
}

/// Run `steps` in order, then render the final frame.
fn replay(steps: Vec<Step>, config: EngineConfig) -> Result<Replay, CliError> {
    let mut core = EngineCore::new(config);
    let mut surface = RecordingSurface::new();
    let mut events = Vec::new();

    for (step, op) in steps.into_iter().enumerate() {
        let emitted = apply(&mut core, &mut surface, op).map_err(|source| CliError::Step { step, source })?;
        tracing::debug!(step, events = emitted.len(), "step applied");
        events.extend(emitted);
    }

    core.render(&mut surface).map_err(CliError::Render)?;
    Ok(Replay { core, surface, events })
}

fn apply(core: &mut EngineCore, surface: &mut RecordingSurface, step: Step) -> Result<Vec<EngineEvent>, EngineError> {
    let events = match step {
        Step::Tool { kind, options } => core.set_tool_json(&kind, &options),
        Step::Pointer { target, phase, position, movement } => {
            let event = PointerEvent::new(phase, position, movement);
            match target {
                Some(target) => core.dispatch(target, event)?,
                None => core.on_pointer(event)?,
            }
        }
        Step::Undo => core.undo(),
        Step::Redo => core.redo(),
        Step::UndoAll => core.undo_all(),
        Step::Clear => core.clear(),
        Step::Viewport { pan_x, pan_y, zoom } => core.set_viewport(pan_x, pan_y, zoom),
        Step::PlaceImage { bitmap, center, width, height } => {
            core.place_image(BitmapId(bitmap), center, width, height)
        }
        Step::SaveCheckpoint => core.save_checkpoint(surface)?,
        Step::LoadCheckpoint { index } => core.load_checkpoint(index),
    };
    Ok(events)
}

fn positive(value: Option<f64>, name: &str) -> Option<f64> {
    let value = value?;
    if value.is_finite() && value > 0.0 {
        Some(value)
    } else {
        tracing::warn!(name, value, "ignoring non-positive surface size");
        None
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
