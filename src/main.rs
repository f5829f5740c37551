use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::{
    config, preview::NoPreview, preview::Preview, preview::SnapshotPreview, source::CameraSource,
    source::ReplaySource, FaceCatalog, FrameSource, Pipeline, Session, SessionOutcome,
};
use log::{error, info, warn};

const EXIT_REJECTED: u8 = 1;
const EXIT_CANCELLED: u8 = 2;
const EXIT_ERROR: u8 = 3;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "facegate")]
#[command(
    version,
    about = "Camera access gate - admits a recognized face after a continuous dwell"
)]
struct Cli {
    /// Config file (defaults to the installed config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one admission attempt; exit status 0 admitted, 1 rejected,
    /// 2 cancelled, 3 error
    Run {
        /// Replay still frames from a directory instead of the camera
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Frame rate assumed for --replay
        #[arg(long, default_value_t = 15.0)]
        fps: f64,
        /// Write the annotated preview frame here (overrides config)
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// List the identities loaded from the reference directory
    Catalog {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Match every face in an image against the catalog
    Check {
        /// Image to check
        image: PathBuf,
    },
    /// Open config file in editor
    Config,
}

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            replay,
            fps,
            preview,
        } => run(&cfg, replay.as_deref(), fps, preview.or(cfg.preview_path.clone())),
        Commands::Catalog { json } => {
            list_catalog(&cfg, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { image } => {
            check(&cfg, &image)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            let path = cli.config.as_deref().unwrap_or(*config::CONFIG_PATH);
            open_config(path)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_pipeline(cfg: &config::Config) -> Result<Pipeline> {
    Pipeline::load(&cfg.model_paths(), cfg.detector_params())
        .context("Failed to initialize face recognition pipeline")
}

fn build_catalog(cfg: &config::Config, pipeline: &mut Pipeline) -> Result<FaceCatalog> {
    FaceCatalog::build(&cfg.known_faces_dir, pipeline, cfg.distance_threshold)
        .context("Failed to load known faces")
}

fn run(
    cfg: &config::Config,
    replay: Option<&Path>,
    fps: f64,
    preview_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let params = cfg.gate_params()?;
    let mut pipeline = load_pipeline(cfg)?;
    let catalog = build_catalog(cfg, &mut pipeline)?;
    if catalog.is_empty() {
        warn!(
            "no known faces in {}; the attempt can only time out",
            cfg.known_faces_dir.display()
        );
    }

    install_interrupt_handler()?;

    let mut source: Box<dyn FrameSource> = match replay {
        Some(dir) => Box::new(ReplaySource::open(dir, fps)?),
        None => {
            info!("Opening camera: {}", cfg.camera);
            Box::new(CameraSource::open(
                &cfg.camera,
                cfg.mirror,
                cfg.frame_timeout()?,
            )?)
        }
    };
    let mut preview: Box<dyn Preview> = match preview_path {
        Some(path) => {
            info!("Preview frames: {}", path.display());
            Box::new(SnapshotPreview::new(path))
        }
        None => Box::new(NoPreview),
    };

    let mut session = Session::new(&catalog, params);
    let outcome = session.run(
        source.as_mut(),
        &mut pipeline,
        preview.as_mut(),
        &INTERRUPTED,
    )?;

    Ok(match outcome {
        SessionOutcome::Admitted { identities } => {
            info!("✓ Access granted: {}", identities.join(", "));
            ExitCode::SUCCESS
        }
        SessionOutcome::RejectedTimeout => {
            info!("✗ Access denied: no known face for {:?}", params.absence);
            ExitCode::from(EXIT_REJECTED)
        }
        SessionOutcome::Cancelled => {
            info!("Cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
    })
}

fn list_catalog(cfg: &config::Config, json: bool) -> Result<()> {
    let mut pipeline = load_pipeline(cfg)?;
    let catalog = build_catalog(cfg, &mut pipeline)?;

    if json {
        let entries: Vec<_> = catalog
            .identities()
            .iter()
            .map(|k| serde_json::json!({ "name": k.name, "dimensions": k.embedding.len() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for known in catalog.identities() {
            println!("{}", known.name);
        }
    }
    Ok(())
}

fn check(cfg: &config::Config, image_path: &Path) -> Result<()> {
    let mut pipeline = load_pipeline(cfg)?;
    let catalog = build_catalog(cfg, &mut pipeline)?;

    let img = image::open(image_path)
        .with_context(|| format!("Failed to open {}", image_path.display()))?;
    let faces = pipeline.faces(&img)?;
    if faces.is_empty() {
        anyhow::bail!("No face detected in {}", image_path.display());
    }

    for (i, (detection, embedding)) in faces.iter().enumerate() {
        let result = catalog.match_embedding(embedding);
        println!(
            "face {} at {:?} (score {:.3}): {} distance {:.3} (threshold {:.3})",
            i + 1,
            detection.bbox,
            detection.score,
            result.label(),
            result.distance,
            catalog.threshold()
        );
    }
    Ok(())
}

fn open_config(config_path: &Path) -> Result<()> {
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}

extern "C" fn on_interrupt(signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    // A second signal gets the default action and kills the process.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
    }
}

/// SIGINT/SIGTERM set the cancellation flag once; the session notices it
/// before the next frame, or when the blocked capture gives up, and shuts
/// the camera down.
fn install_interrupt_handler() -> Result<()> {
    let handler = on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signal in [libc::SIGINT, libc::SIGTERM] {
        if unsafe { libc::signal(signal, handler) } == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("installing handler for signal {}", signal));
        }
    }
    Ok(())
}
