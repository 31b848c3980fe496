use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use scrollshot::config::{self, CaptureConfig};
use scrollshot::page::Page;
use scrollshot::scroll::{self, ScrollKind};
use scrollshot::sequencer::{plan_steps, step_count, CaptureFrame, MAX_STEPS};
use scrollshot::stitch::{self, StitchRequest};
use scrollshot::store::{default_sidecar_for, ensure_parent_dir, write_json_pretty};
use scrollshot::{
    logging, CaptureController, FileStore, LogPresenter, PointerEvent, ProcessSlot, Scene,
    SceneCamera, Toggle,
};

const MANIFEST_HELP: &str = r##"Stitch manifest schema:
{
  "mode": "document",            // or "container"
  "target_offset": 1850,         // content-space Y of the click, CSS px
  "viewport_width": 800,         // CSS px
  "device_pixel_ratio": 1.0,
  "viewport_offset": 0,          // container top edge in the viewport (container mode)
  "frames": [
    {"path": "frame-0.png", "offset": 0},
    {"path": "frame-1.png", "offset": 800}
  ]
}

Frame paths are resolved relative to the manifest file.
"##;

#[derive(Parser, Debug)]
#[command(
    name = "scrollshot",
    version,
    about = "Capture a scrolling surface step by step and stitch it into one PNG"
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print the scroll context resolved for a scene
    Resolve(ResolveArgs),
    /// Print the scroll offsets a capture would visit
    Plan(PlanArgs),
    /// Run one capture session against a scene and save the stitched PNG
    Capture(CaptureArgs),
    /// Stitch previously captured frames described by a manifest
    Stitch(StitchArgs),
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Scene JSON path
    #[arg(long)]
    scene: PathBuf,
    /// Config JSON path
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Content-space Y of the click
    #[arg(long, allow_hyphen_values = true)]
    target: f64,
    /// Visible height covered by one step
    #[arg(long)]
    step: f64,
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// Scene JSON path
    #[arg(long)]
    scene: PathBuf,
    /// Viewport Y of the capturing click
    #[arg(long, allow_hyphen_values = true)]
    click_y: f64,
    /// Scroll the resolved surface to this offset before clicking
    #[arg(long)]
    scroll: Option<f64>,
    /// Output directory (default: SCROLLSHOT_OUT_DIR or .scrollshot)
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Config JSON path
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print capture metadata JSON to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    /// Disable metadata sidecar generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_sidecar: bool,
}

#[derive(Args, Debug)]
struct StitchArgs {
    /// Manifest JSON path
    #[arg(long, required_unless_present = "manifest_help")]
    manifest: Option<PathBuf>,
    /// Output PNG path
    #[arg(long, required_unless_present = "manifest_help")]
    out: Option<PathBuf>,
    /// Print the manifest schema and exit
    #[arg(long, action = ArgAction::SetTrue)]
    manifest_help: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StitchManifest {
    mode: ScrollKind,
    target_offset: f64,
    viewport_width: f64,
    #[serde(default = "default_pixel_ratio")]
    device_pixel_ratio: f64,
    #[serde(default)]
    viewport_offset: f64,
    frames: Vec<ManifestFrame>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFrame {
    path: PathBuf,
    offset: f64,
}

fn default_pixel_ratio() -> f64 {
    1.0
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Resolve(args) => command_resolve(args),
        Commands::Plan(args) => command_plan(args),
        Commands::Capture(args) => command_capture(args),
        Commands::Stitch(args) => command_stitch(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "resolve",
            "description": "Report whether the document or an inner container scrolls.",
        }),
        json!({
            "name": "plan",
            "description": "List the scroll offsets visited for a target offset.",
        }),
        json!({
            "name": "capture",
            "description": "Capture a scene down to a clicked point and save one PNG + sidecar.",
        }),
        json!({
            "name": "stitch",
            "description": "Stitch captured frames from a manifest into one PNG.",
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CaptureConfig> {
    match path {
        Some(path) => CaptureConfig::load(path),
        None => Ok(CaptureConfig::default()),
    }
}

fn command_resolve(args: ResolveArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let scene = Scene::load(&args.scene)?;
    let ctx = scroll::resolve(&scene, &config);
    let payload = json!({
        "kind": ctx.kind,
        "element": ctx.element.map(|el| scene.name_of(el).to_string()),
        "viewport_offset": ctx.viewport_offset,
        "step_size": ctx.step_size,
        "scroll_offset": ctx.scroll_offset(&scene),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn command_plan(args: PlanArgs) -> Result<()> {
    if !(args.step > 0.0) {
        bail!("--step must be positive");
    }
    if !(args.target > 0.0) || !args.target.is_finite() {
        bail!("--target must be a finite offset below the top of the content (> 0)");
    }
    if step_count(args.target, args.step).is_none() {
        bail!("--target needs more than {MAX_STEPS} steps of {}", args.step);
    }
    let steps = plan_steps(args.target, args.step);
    let payload = json!({
        "target": args.target,
        "step": args.step,
        "count": steps.len(),
        "offsets": steps,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn command_capture(args: CaptureArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut scene = Scene::load(&args.scene)?;

    if let Some(offset) = args.scroll {
        let ctx = scroll::resolve(&scene, &config);
        ctx.set_scroll_offset(&mut scene, offset);
    }

    let out_root = config::out_root(args.out_dir.as_deref());
    let mut store = FileStore::new(out_root);
    let mut camera = SceneCamera::new();
    let mut controller = CaptureController::new(config, LogPresenter, ProcessSlot);

    if controller.toggle() != Toggle::Started {
        bail!("a capture session is already running");
    }
    let event = PointerEvent {
        client_y: args.click_y,
        target: None,
    };
    let outcome = controller
        .click(&mut scene, &mut camera, &mut store, event)?
        .context("click was not accepted by the capture session")?;

    let sidecar_path = if args.no_sidecar {
        None
    } else {
        Some(default_sidecar_for(&outcome.path))
    };

    let payload = json!({
        "image_path": abs_path(&outcome.path).display().to_string(),
        "sidecar_path": sidecar_path.as_ref().map(|p| abs_path(p).display().to_string()),
        "captured_at": Utc::now().to_rfc3339(),
        "captured_at_epoch_ms": Utc::now().timestamp_millis(),
        "scene": abs_path(&args.scene).display().to_string(),
        "title": outcome.title,
        "scroll": {
            "kind": outcome.context.kind,
            "element": outcome.context.element.map(|el| scene.name_of(el).to_string()),
            "viewport_offset": outcome.context.viewport_offset,
            "step_size": outcome.context.step_size,
        },
        "target_offset": round_to(outcome.target, 3),
        "frames": outcome.frame_offsets,
        "frame_count": outcome.frame_offsets.len(),
        "snapshots": camera.shots(),
        "image_size": {
            "w": outcome.width,
            "h": outcome.height,
            "units": "px",
        },
        "device_pixel_ratio": scene.viewport().device_pixel_ratio,
        "capture_tool": "scrollshot capture",
        "capture_sidecar_version": 1,
    });

    if let Some(path) = sidecar_path.as_deref() {
        write_json_pretty(path, &payload)?;
    }

    if args.json {
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        println!("{}", abs_path(&outcome.path).display());
    }
    Ok(())
}

fn command_stitch(args: StitchArgs) -> Result<()> {
    if args.manifest_help {
        println!("{MANIFEST_HELP}");
        return Ok(());
    }
    let (Some(manifest_path), Some(out)) = (args.manifest, args.out) else {
        bail!("--manifest and --out are required");
    };

    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read manifest: {}", manifest_path.display()))?;
    let manifest: StitchManifest = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest JSON: {}", manifest_path.display()))?;
    if !(manifest.target_offset > 0.0) {
        bail!("target_offset must be greater than zero");
    }

    let base = manifest_path.parent().unwrap_or_else(|| Path::new(""));
    let mut frames = Vec::with_capacity(manifest.frames.len());
    for frame in &manifest.frames {
        let path = if frame.path.is_absolute() {
            frame.path.clone()
        } else {
            base.join(&frame.path)
        };
        let image =
            fs::read(&path).with_context(|| format!("failed to read frame: {}", path.display()))?;
        frames.push(CaptureFrame {
            image,
            offset: frame.offset,
        });
    }

    let request = StitchRequest {
        kind: manifest.mode,
        target: manifest.target_offset,
        viewport_width: manifest.viewport_width,
        pixel_density: manifest.device_pixel_ratio,
        viewport_offset: manifest.viewport_offset,
    };
    let stitched = stitch::stitch(&frames, &request)?.context("manifest lists no frames")?;

    ensure_parent_dir(&out)?;
    fs::write(&out, &stitched.png)
        .with_context(|| format!("failed to write image: {}", out.display()))?;

    let payload: Value = json!({
        "image_path": abs_path(&out).display().to_string(),
        "frame_count": frames.len(),
        "image_size": {"w": stitched.width, "h": stitched.height, "units": "px"},
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn round_to(v: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (v * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn manifest_parses_with_defaults() {
        let manifest: StitchManifest = serde_json::from_value(json!({
            "mode": "container",
            "target_offset": 940,
            "viewport_width": 300,
            "frames": [{"path": "a.png", "offset": 0}]
        }))
        .unwrap();
        assert_eq!(manifest.mode, ScrollKind::Container);
        assert_eq!(manifest.device_pixel_ratio, 1.0);
        assert_eq!(manifest.viewport_offset, 0.0);
    }

    #[test]
    fn round_to_digits() {
        assert_eq!(round_to(1.23456, 3), 1.235);
    }
}
