// THEORY:
// `tracking_robot` is the runnable end of the workspace. It wires a frame
// collaborator (a directory of images, or a live camera with the `camera`
// feature) into a `TrackingSession`, reports every track through the motion
// adapters, and optionally writes annotated snapshots so the result can be
// inspected without a preview window.
//
// The tracking itself runs on the session's own OS threads. Tokio only waits for
// the reasons to stop (ctrl-c, a time limit, or a finite source running dry) and
// then closes the session on a blocking task, because closing joins threads.

mod sources;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colour_tracking::motion::MotionFanout;
use colour_tracking::{
    AimingController, FrameCapture, HsvRange, MomentSource, MotionCommand, MotionController,
    TrackHistory, TrackLogger, TrackingConfig, TrackingSession,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::sources::ImageDirectory;

#[derive(Debug, Parser)]
#[command(name = "tracking_robot", about = "Track a coloured object and steer towards it")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named HSV range (overrides the config file)
    #[arg(long)]
    preset: Option<String>,

    /// Tracking threads (overrides the config file)
    #[arg(long)]
    workers: Option<usize>,

    /// Replay the images in this directory
    #[arg(long, conflicts_with = "camera")]
    frames: Option<PathBuf>,

    /// Replay pacing in frames per second
    #[arg(long, requires = "frames")]
    fps: Option<f64>,

    /// Start again from the first image after the last
    #[arg(long, requires = "frames")]
    repeat: bool,

    /// Capture from this camera index
    #[arg(long)]
    camera: Option<i32>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// Write the latest annotated frame to this PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Seconds between snapshot writes (overrides the config file)
    #[arg(long)]
    snapshot_interval: Option<f64>,

    /// Also write the cleaned mask to this PNG
    #[arg(long, requires = "snapshot")]
    mask: Option<PathBuf>,

    /// Use whole-mask moments instead of the largest contour
    #[arg(long)]
    raw_moments: bool,

    /// Log the head/drive commands a robot would receive
    #[arg(long)]
    aim: bool,
}

fn load_config(args: &Args) -> Result<TrackingConfig> {
    let mut config = match &args.config {
        Some(path) => TrackingConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TrackingConfig::default(),
    };

    if let Some(preset) = &args.preset {
        if HsvRange::preset(preset).is_none() {
            bail!(
                "unknown preset '{preset}', expected one of: {}",
                HsvRange::preset_names().join(", ")
            );
        }
        config.tracker.preset = Some(preset.clone());
        config.tracker.hsv = None;
    }
    if let Some(workers) = args.workers {
        config.session.workers = Some(workers);
    }
    if args.raw_moments {
        config.tracker.moments = MomentSource::Mask;
    }
    if let Some(path) = &args.snapshot {
        config.session.display = true;
        config.session.snapshot_path = path.clone();
    }
    if let Some(path) = &args.mask {
        config.session.mask_snapshot_path = Some(path.clone());
    }
    if let Some(seconds) = args.snapshot_interval {
        let interval = duration_arg("--snapshot-interval", seconds)?;
        config.session.snapshot_interval_ms = u64::try_from(interval.as_millis())
            .with_context(|| format!("--snapshot-interval {seconds} is too long"))?;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// A non-negative, representable number of seconds.
fn duration_arg(name: &str, seconds: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) => Ok(duration),
        Err(error) => bail!("{name} {seconds} is not a usable duration: {error}"),
    }
}

/// Time between frames for a replay rate, if one was asked for.
fn frame_interval(fps: Option<f64>) -> Result<Option<Duration>> {
    let Some(fps) = fps else {
        return Ok(None);
    };
    if fps.is_nan() || fps <= 0.0 {
        bail!("--fps must be positive, got {fps}");
    }
    duration_arg("--fps interval", 1.0 / fps).map(Some)
}

fn open_capture(args: &Args) -> Result<Box<dyn FrameCapture>> {
    if let Some(dir) = &args.frames {
        let source = ImageDirectory::open(dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
            .repeat(args.repeat)
            .pace_every(frame_interval(args.fps)?);
        info!(images = source.len(), dir = %dir.display(), "replaying images");
        return Ok(Box::new(source));
    }

    if let Some(index) = args.camera {
        return open_camera(index);
    }

    bail!("nothing to capture from: pass --frames <dir> or --camera <index>")
}

#[cfg(feature = "camera")]
fn open_camera(index: i32) -> Result<Box<dyn FrameCapture>> {
    let camera = sources::Camera::open(index).with_context(|| format!("failed to open camera {index}"))?;
    info!(index, "capturing from camera");
    Ok(Box::new(camera))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_index: i32) -> Result<Box<dyn FrameCapture>> {
    bail!("camera capture needs the `camera` feature")
}

struct BoxedCapture(Box<dyn FrameCapture>);

impl FrameCapture for BoxedCapture {
    fn capture(&mut self, frame: &mut colour_tracking::FrameBuffer) -> colour_tracking::CaptureResult {
        self.0.capture(frame)
    }
}

async fn wait_for_stop(session: &TrackingSession, limit: Option<Duration>) {
    let finished = async {
        while !session.source_finished() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!(%error, "ctrl-c handler failed");
            }
            info!("interrupted");
        }
        _ = deadline => info!("time limit reached"),
        _ = finished => info!("all frames captured"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let capture = BoxedCapture(open_capture(&args)?);

    let history = Arc::new(TrackHistory::new());
    let mut motion = MotionFanout::new()
        .with(history.clone())
        .with(Arc::new(TrackLogger));
    if args.aim {
        let aim = AimingController::new(|command: MotionCommand| info!(?command, "motion command"));
        motion = motion.with(Arc::new(aim));
    }
    let motion: Arc<dyn MotionController> = Arc::new(motion);

    if config.session.display {
        info!(path = %config.session.snapshot_path.display(), "writing snapshots");
    }

    let mut session = TrackingSession::start(&config, capture, motion, None)
        .context("failed to start tracking session")?;

    wait_for_stop(&session, args.seconds.map(Duration::from_secs)).await;

    let report = tokio::task::spawn_blocking(move || session.close())
        .await
        .context("session shutdown task failed")?;

    let summary = history.summary();
    match report {
        Ok(report) => {
            println!("{}", report.throughput);
            println!(
                "Captured {} frames, object found in {} and lost in {}",
                report.capture.captured, summary.found, summary.lost
            );
            if let Some(track) = summary.last_found {
                println!("Last track: x = {}, y = {}, area = {}", track.x, track.y, track.area);
            }
            Ok(())
        }
        Err(error) => Err(error).context("tracking session reported errors"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrepresentable_durations_are_rejected() {
        assert_eq!(duration_arg("--snapshot-interval", 0.5).unwrap(), Duration::from_millis(500));
        assert!(duration_arg("--snapshot-interval", f64::INFINITY).is_err());
        assert!(duration_arg("--snapshot-interval", f64::NAN).is_err());
        assert!(duration_arg("--snapshot-interval", -1.0).is_err());
    }

    #[test]
    fn replay_rate_must_give_a_usable_interval() {
        assert_eq!(frame_interval(None).unwrap(), None);
        assert_eq!(frame_interval(Some(4.0)).unwrap(), Some(Duration::from_millis(250)));
        assert!(frame_interval(Some(1e-300)).is_err());
        assert!(frame_interval(Some(0.0)).is_err());
        assert!(frame_interval(Some(f64::NAN)).is_err());
    }

    #[test]
    fn snapshot_flag_turns_on_the_display_stage() {
        let args = Args::parse_from([
            "tracking_robot",
            "--frames",
            "frames",
            "--snapshot",
            "latest.png",
            "--snapshot-interval",
            "0.25",
        ]);
        let config = load_config(&args).unwrap();
        assert!(config.session.display);
        assert_eq!(config.session.snapshot_path, PathBuf::from("latest.png"));
        assert_eq!(config.session.snapshot_interval_ms, 250);

        let args = Args::parse_from(["tracking_robot", "--snapshot-interval", "inf"]);
        assert!(load_config(&args).is_err());
    }
}
