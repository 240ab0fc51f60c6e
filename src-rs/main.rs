use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value};
use snap_solver::config::{Settings, LOG_ENV};
use snap_solver::gesture::{parse_gesture_script, parse_point};
use snap_solver::overlay::render_selection_preview;
use snap_solver::session::ConfirmControl;
use snap_solver::solve::{render_fallback_report, render_markdown};
use snap_solver::store::{validate_key, KeyValueStore, LocalStore};
use snap_solver::util::{
    abs_path, round_to, run_id, sidecar_for, slugify, timestamp_iso, write_bytes,
    write_json_pretty,
};
use snap_solver::{
    compute_scale, CommandSolver, CpuSurface, CropOptions, CropOutput, CropSession, EncodeFormat,
    Point, ScaleMode, SelectionRect, Size, SourceImage,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const GESTURE_HELP: &str = r##"Gesture scripts replay pointer input over the displayed image:

  down 50,50; move 150,120; up

Steps: down|start X,Y  move X,Y  up|end  leave
       touchstart X,Y  touchmove X,Y  touchend  touchcancel

Coordinates are client coordinates; --offset X,Y is subtracted to get
container-local points. Moves outside the displayed image are clamped to its
edges. Selections smaller than 10x10 displayed px cannot be confirmed.
"##;

#[derive(Parser, Debug)]
#[command(
    name = "snap-solver",
    version,
    about = "Crop a photographed problem and solve it with a vision model CLI"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::enum_variant_names)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print native/displayed size and scale factors of an image
    Inspect(InspectArgs),
    /// Select a region and write the encoded crop plus a JSON sidecar
    #[command(after_help = GESTURE_HELP)]
    Crop(CropArgs),
    /// Crop, submit to the solver, store and report the solution
    #[command(after_help = GESTURE_HELP)]
    Solve(SolveArgs),
    /// List stored solutions for a user
    History(HistoryArgs),
}

#[derive(Args, Debug)]
struct LayoutArgs {
    /// Displayed size WxH (default: native size)
    #[arg(long, value_parser = parse_size, conflicts_with = "fit")]
    display: Option<Size>,
    /// Fit the displayed image inside WxH, keeping aspect ratio
    #[arg(long, value_parser = parse_size)]
    fit: Option<Size>,
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// Selection x,y,w,h in displayed pixels (default: whole image)
    #[arg(long, value_parser = parse_rect, conflicts_with = "gesture")]
    rect: Option<SelectionRect>,
    /// Gesture script, e.g. "down 50,50; move 150,120; up"
    #[arg(long)]
    gesture: Option<String>,
    /// Container offset X,Y subtracted from gesture coordinates
    #[arg(long, value_parser = parse_point_arg, default_value = "0,0")]
    offset: Point,
    /// uniform|per-axis
    #[arg(long, value_parser = parse_scale_mode)]
    scale_mode: Option<ScaleMode>,
    /// jpeg|png
    #[arg(long, value_parser = parse_format, default_value = "jpeg")]
    format: EncodeFormat,
    /// Encoder quality in [0, 1] (JPEG only)
    #[arg(long)]
    quality: Option<f32>,
    /// Write a selection preview PNG
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    image: PathBuf,
    #[command(flatten)]
    layout: LayoutArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct CropArgs {
    /// Input image path
    image: PathBuf,
    #[command(flatten)]
    layout: LayoutArgs,
    #[command(flatten)]
    selection: SelectionArgs,
    /// Output path for the encoded crop
    #[arg(long)]
    out: Option<PathBuf>,
    /// Custom sidecar path (default: <out>.json)
    #[arg(long)]
    sidecar: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    no_sidecar: bool,
    /// Print the crop as a base64 data URL (added as `data_url` with --json)
    #[arg(long, action = ArgAction::SetTrue)]
    data_url: bool,
    /// Print crop metadata JSON to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct SolveArgs {
    /// Input image path
    image: PathBuf,
    #[command(flatten)]
    layout: LayoutArgs,
    #[command(flatten)]
    selection: SelectionArgs,
    /// Free text sent with the image
    #[arg(long)]
    text: Option<String>,
    /// Override solver executable
    #[arg(long)]
    solver_bin: Option<String>,
    /// Optional model override
    #[arg(long)]
    model: Option<String>,
    /// Solver timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Skip the solver and write a fallback report
    #[arg(long, action = ArgAction::SetTrue)]
    no_solver: bool,
    /// Exit non-zero when the solver fails (instead of a fallback report)
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,
    /// User id for the history store
    #[arg(long)]
    user: Option<String>,
    /// Item id for the history store (default: generated)
    #[arg(long)]
    item: Option<String>,
    /// Custom markdown report path
    #[arg(long)]
    report: Option<PathBuf>,
    /// Artifact root (default: SNAP_SOLVER_OUT_DIR / .snap-solver)
    #[arg(long)]
    out_dir: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    out_dir: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Inspect(args) => command_inspect(args),
        Commands::Crop(args) => command_crop(args, &settings),
        Commands::Solve(args) => command_solve(args, settings),
        Commands::History(args) => command_history(args, settings),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({"name": "inspect", "description": "Show native/displayed size and scale factors."}),
        json!({"name": "crop", "description": "Select a region and write the encoded crop with a JSON sidecar."}),
        json!({"name": "solve", "description": "Crop, submit to the solver, store and report the solution."}),
        json!({"name": "history", "description": "List stored solutions for a user."}),
    ];
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn command_inspect(args: InspectArgs) -> Result<()> {
    let source = load_source(&args.image, &args.layout)?;
    let native = source.native_size();
    let displayed = source.displayed_size();
    let uniform = compute_scale(&source, ScaleMode::Uniform)?;
    let per_axis = compute_scale(&source, ScaleMode::PerAxis)?;

    let payload = json!({
        "image_path": abs_path(&args.image).display().to_string(),
        "native": {"w": native.width, "h": native.height, "units": "px"},
        "displayed": {"w": round_to(displayed.width, 3), "h": round_to(displayed.height, 3), "units": "css_px"},
        "scale": round_to(uniform.x, 6),
        "scale_x": round_to(per_axis.x, 6),
        "scale_y": round_to(per_axis.y, 6),
        "aspect_preserved": per_axis.is_uniform(),
    });

    if args.json {
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        println!(
            "{}x{} px shown at {}x{} (scale {})",
            native.width,
            native.height,
            round_to(displayed.width, 3),
            round_to(displayed.height, 3),
            round_to(uniform.x, 6)
        );
    }
    Ok(())
}

fn command_crop(args: CropArgs, settings: &Settings) -> Result<()> {
    let mut session = open_session(&args.image, &args.layout, &args.selection, settings)?;
    let out_path = args.out.clone().unwrap_or_else(|| {
        let slug = slugify(&file_stem(&args.image), "image");
        settings.crop_dir().join(format!(
            "crop-{slug}-{}.{}",
            run_id(),
            args.selection.format.extension()
        ))
    });

    let output = confirm_crop(&mut session)?.clone();
    write_bytes(&out_path, &output.encoded.bytes)
        .with_context(|| format!("failed to write crop: {}", out_path.display()))?;

    if let Some(preview) = &args.selection.preview {
        write_preview(&session, &output, preview)?;
    }

    let sidecar_path = if args.no_sidecar {
        None
    } else {
        Some(args.sidecar.clone().unwrap_or_else(|| sidecar_for(&out_path)))
    };
    let payload = crop_payload(&args.image, &out_path, &session, &output, sidecar_path.as_deref());
    if let Some(path) = &sidecar_path {
        write_json_pretty(path, &payload)
            .with_context(|| format!("failed to write sidecar: {}", path.display()))?;
    }

    println!("{}", crop_stdout(&args, payload, &out_path, &output)?);
    Ok(())
}

fn crop_stdout(
    args: &CropArgs,
    mut payload: Value,
    out_path: &Path,
    output: &CropOutput,
) -> Result<String> {
    if args.json {
        if args.data_url {
            payload["data_url"] = json!(output.encoded.data_url());
        }
        Ok(serde_json::to_string(&payload)?)
    } else if args.data_url {
        Ok(output.encoded.data_url())
    } else {
        Ok(abs_path(out_path).display().to_string())
    }
}

fn command_solve(args: SolveArgs, mut settings: Settings) -> Result<()> {
    if let Some(dir) = args.out_dir.clone() {
        settings.out_dir = dir;
    }
    if let Some(bin) = args.solver_bin.clone() {
        settings.solver_bin = Some(bin);
    }
    if let Some(model) = args.model.clone() {
        settings.model = Some(model);
    }
    if let Some(user) = args.user.clone() {
        settings.user_id = user;
    }
    if let Some(timeout) = args.timeout {
        settings.timeout_secs = timeout;
    }

    check_store_keys(&settings.user_id, args.item.as_deref())?;

    let mut session = open_session(&args.image, &args.layout, &args.selection, &settings)?;
    let output = confirm_crop(&mut session)?.clone();

    let solve_dir = settings.solve_dir();
    fs::create_dir_all(&solve_dir)
        .with_context(|| format!("failed to create solve dir: {}", solve_dir.display()))?;
    let slug = slugify(&file_stem(&args.image), "image");
    let base = format!("solve-{slug}-{}", run_id());
    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| solve_dir.join(format!("{base}-report.md")));

    let solver_bin = if args.no_solver {
        None
    } else {
        settings.resolve_solver_bin()
    };
    let solver = solver_bin.map(|bin| CommandSolver {
        bin,
        model: settings.model.clone(),
        timeout: Duration::from_secs(settings.timeout_secs),
        work_dir: solve_dir.clone(),
        run_name: base.clone(),
    });

    // The solver writes the crop itself before it runs.
    let crop_path = match &solver {
        Some(solver) => solver.image_path(&output.encoded),
        None => {
            let path = solve_dir.join(format!("{base}-crop.{}", output.encoded.format.extension()));
            write_bytes(&path, &output.encoded.bytes)
                .with_context(|| format!("failed to write crop: {}", path.display()))?;
            path
        }
    };

    if let Some(preview) = &args.selection.preview {
        write_preview(&session, &output, preview)?;
    }

    let crop_meta = crop_payload(&args.image, &crop_path, &session, &output, None);
    let text = args.text.as_deref();

    let attempt = solver
        .as_ref()
        .map(|solver| (solver.log_path(), session.submit(solver, text)));

    let (mode, item_id, fallback_reason, log_path) = match attempt {
        Some((log_path, Ok(solution))) => {
            write_bytes(&report_path, render_markdown(&solution).as_bytes())
                .with_context(|| format!("failed to write report: {}", report_path.display()))?;
            let item_id = args.item.clone().unwrap_or_else(|| base.clone());
            let store = LocalStore::new(settings.store_dir());
            let record = json!({
                "created_at": timestamp_iso(),
                "text": text,
                "crop": crop_meta.clone(),
                "report_path": abs_path(&report_path).display().to_string(),
                "solution": solution,
            });
            store
                .put(&settings.user_id, &item_id, &record)
                .with_context(|| format!("failed to store solution {item_id}"))?;
            info!(user = %settings.user_id, item = %item_id, "solution stored");
            ("llm", Some(item_id), None, Some(log_path))
        }
        Some((log_path, Err(err))) => {
            warn!(error = %err, "solver failed");
            if args.strict {
                let payload = json!({
                    "mode": "error",
                    "error": err.to_string(),
                    "message": err.user_message(),
                    "crop_path": abs_path(&crop_path).display().to_string(),
                    "log_path": abs_path(&log_path).display().to_string(),
                });
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                }
                bail!("{}: {err}", err.user_message());
            }
            let reason = format!("{} ({err})", err.user_message());
            ("fallback", None, Some(reason), Some(log_path))
        }
        None => {
            let reason = if args.no_solver {
                "Solver disabled via --no-solver".to_string()
            } else {
                "No solver found (set SNAP_SOLVER_BIN or install `codex`)".to_string()
            };
            if args.strict && !args.no_solver {
                bail!("{reason}");
            }
            ("fallback", None, Some(reason), None)
        }
    };

    if let Some(reason) = &fallback_reason {
        let report = render_fallback_report(reason, text, Some(abs_path(&crop_path).as_path()));
        write_bytes(&report_path, report.as_bytes())
            .with_context(|| format!("failed to write report: {}", report_path.display()))?;
    }

    let result = json!({
        "mode": mode,
        "user_id": settings.user_id,
        "item_id": item_id,
        "crop_path": abs_path(&crop_path).display().to_string(),
        "report_path": abs_path(&report_path).display().to_string(),
        "log_path": log_path.map(|p| abs_path(&p).display().to_string()),
        "fallback_reason": fallback_reason,
        "crop": crop_meta,
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", abs_path(&report_path).display());
    }
    Ok(())
}

fn command_history(args: HistoryArgs, mut settings: Settings) -> Result<()> {
    if let Some(dir) = args.out_dir {
        settings.out_dir = dir;
    }
    let user = args.user.unwrap_or_else(|| settings.user_id.clone());
    let store = LocalStore::new(settings.store_dir());
    let items = store
        .list(&user)
        .with_context(|| format!("failed to list history for {user}"))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string(&json!({"user_id": user, "items": items}))?
        );
    } else {
        for item in items {
            println!("{item}");
        }
    }
    Ok(())
}

fn load_source(path: &Path, layout: &LayoutArgs) -> Result<SourceImage> {
    if !path.exists() {
        bail!("input not found: {}", path.display());
    }
    let source = SourceImage::open(path)
        .with_context(|| format!("failed to open input image: {}", path.display()))?;
    Ok(match (layout.display, layout.fit) {
        (Some(size), _) => source.with_displayed_size(size),
        (None, Some(max)) => source.fitted_within(max),
        (None, None) => source,
    })
}

fn open_session(
    path: &Path,
    layout: &LayoutArgs,
    selection: &SelectionArgs,
    settings: &Settings,
) -> Result<CropSession> {
    let source = load_source(path, layout)?;
    let options = CropOptions {
        scale_mode: selection.scale_mode.unwrap_or(settings.scale_mode),
        format: selection.format,
        quality: selection.quality.unwrap_or(settings.jpeg_quality),
    };
    let mut session = CropSession::new(source, options);

    if let Some(rect) = selection.rect {
        session.selector_mut().reset(rect);
    } else if let Some(script) = selection.gesture.as_deref() {
        let events = parse_gesture_script(script).context("invalid --gesture")?;
        let selector = session.selector_mut();
        for event in &events {
            selector.handle_pointer(event, selection.offset);
        }
        // An unterminated script still commits its last rectangle.
        selector.on_gesture_end();
    }
    Ok(session)
}

fn confirm_crop(session: &mut CropSession) -> Result<&CropOutput> {
    if session.confirm_control() == ConfirmControl::Disabled {
        let rect = session.selection();
        bail!(
            "selection {}x{} is smaller than the 10x10 minimum",
            round_to(rect.width, 3),
            round_to(rect.height, 3)
        );
    }
    session
        .confirm(&CpuSurface::default())
        .map_err(|err| anyhow::anyhow!("{}: {err}", err.user_message()))
}

/// Refuses store keys up front so a bad `--user`/`--item` never costs a
/// solver run.
fn check_store_keys(user_id: &str, item_id: Option<&str>) -> Result<()> {
    validate_key(user_id).context("invalid --user")?;
    if let Some(item) = item_id {
        validate_key(item).context("invalid --item")?;
    }
    Ok(())
}

fn write_preview(session: &CropSession, output: &CropOutput, path: &Path) -> Result<()> {
    let label = format!("{}x{}", output.encoded.width, output.encoded.height);
    let preview = render_selection_preview(session.source(), &output.selection, Some(&label));
    snap_solver::util::ensure_parent_dir(path)?;
    preview
        .save(path)
        .with_context(|| format!("failed to save preview: {}", path.display()))
}

fn crop_payload(
    input: &Path,
    out_path: &Path,
    session: &CropSession,
    output: &CropOutput,
    sidecar: Option<&Path>,
) -> Value {
    let source = session.source();
    let native = source.native_size();
    let displayed = source.displayed_size();
    let sel = output.selection;
    let nat = output.native;
    json!({
        "crop_sidecar_version": 1,
        "input_path": abs_path(input).display().to_string(),
        "output_path": abs_path(out_path).display().to_string(),
        "sidecar_path": sidecar.map(|p| abs_path(p).display().to_string()),
        "generated_at": timestamp_iso(),
        "native_size": {"w": native.width, "h": native.height, "units": "px"},
        "displayed_size": {"w": round_to(displayed.width, 3), "h": round_to(displayed.height, 3), "units": "css_px"},
        "scale_mode": session.options().scale_mode,
        "scale_x": round_to(output.scale.x, 6),
        "scale_y": round_to(output.scale.y, 6),
        "selection": {
            "x": round_to(sel.x, 3),
            "y": round_to(sel.y, 3),
            "w": round_to(sel.width, 3),
            "h": round_to(sel.height, 3),
            "units": "css_px",
        },
        "native_rect": {
            "x": round_to(nat.x, 3),
            "y": round_to(nat.y, 3),
            "w": round_to(nat.width, 3),
            "h": round_to(nat.height, 3),
            "units": "px",
        },
        "output": {
            "w": output.encoded.width,
            "h": output.encoded.height,
            "format": output.encoded.format,
            "mime": output.encoded.format.mime(),
            "bytes": output.encoded.bytes.len(),
            "quality": session.options().quality,
        },
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string()
}

fn parse_size(raw: &str) -> std::result::Result<Size, String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got `{raw}`"))?;
    let w = w.trim().parse::<f64>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<f64>().map_err(|e| e.to_string())?;
    let size = Size::new(w, h);
    if !size.is_measurable() {
        return Err(format!("size must be positive, got `{raw}`"));
    }
    Ok(size)
}

fn parse_rect(raw: &str) -> std::result::Result<SelectionRect, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| e.to_string())?;
    match parts.as_slice() {
        [x, y, w, h] if *w >= 0.0 && *h >= 0.0 => Ok(SelectionRect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,w,h with non-negative w/h, got `{raw}`")),
    }
}

fn parse_point_arg(raw: &str) -> std::result::Result<Point, String> {
    parse_point(raw).map_err(|e| e.to_string())
}

fn parse_scale_mode(raw: &str) -> std::result::Result<ScaleMode, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "uniform" => Ok(ScaleMode::Uniform),
        "per-axis" | "per_axis" | "peraxis" => Ok(ScaleMode::PerAxis),
        other => Err(format!("unknown scale mode `{other}` (uniform|per-axis)")),
    }
}

fn parse_format(raw: &str) -> std::result::Result<EncodeFormat, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "jpeg" | "jpg" => Ok(EncodeFormat::Jpeg),
        "png" => Ok(EncodeFormat::Png),
        other => Err(format!("unknown format `{other}` (jpeg|png)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgba};
    use tempfile::tempdir;

    #[test]
    fn parses_cli_geometry() {
        assert_eq!(parse_size("400x300").unwrap(), Size::new(400.0, 300.0));
        assert!(parse_size("0x300").is_err());
        assert_eq!(
            parse_rect("50, 50, 100, 70").unwrap(),
            SelectionRect::new(50.0, 50.0, 100.0, 70.0)
        );
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_rect("1,2,-3,4").is_err());
        assert_eq!(parse_scale_mode("per-axis").unwrap(), ScaleMode::PerAxis);
        assert_eq!(parse_format("JPG").unwrap(), EncodeFormat::Jpeg);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn offset_gesture_replay_crops_clamped_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.png");
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(1200, 900, Rgba([1, 2, 3, 255])))
            .save(&path)
            .unwrap();

        let layout = LayoutArgs {
            display: Some(Size::new(400.0, 300.0)),
            fit: None,
        };
        let selection = SelectionArgs {
            rect: None,
            gesture: Some("down 400,30; move 460,70".to_string()),
            offset: Point::new(10.0, 20.0),
            scale_mode: None,
            format: EncodeFormat::Png,
            quality: None,
            preview: None,
        };
        let mut session =
            open_session(&path, &layout, &selection, &Settings::default()).unwrap();
        assert_eq!(
            session.selection(),
            SelectionRect::new(390.0, 10.0, 10.0, 40.0)
        );
        let output = confirm_crop(&mut session).unwrap();
        assert_eq!((output.encoded.width, output.encoded.height), (30, 120));
    }

    #[cfg(unix)]
    fn fake_solver(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        // Copies the --image it receives to seen-crop and answers.
        let script = dir.join("fake-model");
        fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\ncp \"$5\" \"$(dirname \"$0\")/seen-crop\"\nprintf '{\"final_answer\": \"x = 2\"}' > \"$3\"\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn solve_args(dir: &Path, extra: &[&str]) -> SolveArgs {
        let image = dir.join("photo.png");
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(120, 90, Rgba([9, 8, 7, 255])))
            .save(&image)
            .unwrap();
        let script = fake_solver(dir);
        let out_dir = dir.join("out");
        let mut argv = vec![
            "snap-solver".to_string(),
            "solve".to_string(),
            image.display().to_string(),
            "--format".to_string(),
            "png".to_string(),
            "--solver-bin".to_string(),
            script.display().to_string(),
            "--out-dir".to_string(),
            out_dir.display().to_string(),
        ];
        argv.extend(extra.iter().map(|a| a.to_string()));
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Solve(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn bad_store_key_fails_before_solver_runs() {
        let dir = tempdir().unwrap();
        let args = solve_args(dir.path(), &["--user", "a/b"]);
        assert!(command_solve(args, Settings::default()).is_err());
        assert!(!dir.path().join("seen-crop").exists());
        assert!(!dir.path().join("out").exists());

        let args = solve_args(dir.path(), &["--item", "../escape"]);
        assert!(command_solve(args, Settings::default()).is_err());
        assert!(!dir.path().join("seen-crop").exists());
    }

    #[cfg(unix)]
    #[test]
    fn solver_receives_the_only_crop_on_disk() {
        let dir = tempdir().unwrap();
        let args = solve_args(dir.path(), &["--user", "student", "--item", "hw-1"]);
        command_solve(args, Settings::default()).unwrap();

        let solve_dir = dir.path().join("out").join("solve");
        let crops: Vec<PathBuf> = fs::read_dir(&solve_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.display().to_string().ends_with("-crop.png"))
            .collect();
        assert_eq!(crops.len(), 1);
        assert_eq!(
            fs::read(&crops[0]).unwrap(),
            fs::read(dir.path().join("seen-crop")).unwrap()
        );
        let stored = LocalStore::new(dir.path().join("out").join("history"))
            .get("student", "hw-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored["solution"]["final_answer"], "x = 2");
    }

    #[test]
    fn crop_can_print_data_url() {
        let source = SourceImage::from_raster(DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            20,
            20,
            Rgba([0, 0, 0, 255]),
        )));
        let options = CropOptions {
            format: EncodeFormat::Png,
            ..CropOptions::default()
        };
        let mut session = CropSession::new(source, options);
        let output = session.confirm(&CpuSurface::default()).unwrap().clone();
        let out_path = Path::new("crop.png");
        let payload = json!({"width": 20});

        let parse = |extra: &[&str]| {
            let mut argv = vec!["snap-solver", "crop", "photo.png"];
            argv.extend_from_slice(extra);
            match Cli::try_parse_from(argv).unwrap().command {
                Commands::Crop(args) => args,
                other => panic!("unexpected command: {other:?}"),
            }
        };

        let line = crop_stdout(&parse(&["--data-url"]), payload.clone(), out_path, &output).unwrap();
        assert!(line.starts_with("data:image/png;base64,iVBOR"), "{line}");

        let line = crop_stdout(&parse(&["--data-url", "--json"]), payload.clone(), out_path, &output)
            .unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["width"], 20);
        assert_eq!(parsed["data_url"], output.encoded.data_url());

        let line = crop_stdout(&parse(&[]), payload, out_path, &output).unwrap();
        assert!(line.ends_with("crop.png"));
    }
}
