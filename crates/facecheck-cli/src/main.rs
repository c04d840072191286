mod camera;
mod config;
mod render;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use facecheck_core::{
    CancelToken, OnnxFaceAnalyzer, ReferenceError, ReferenceFace, SessionError, SessionOutcome,
    VerificationSession,
};
use facecheck_hw::Camera;
use render::TerminalRenderer;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::task::{JoinError, JoinHandle};

const NO_FACE_MESSAGE: &str = "No face found in document. Try a clearer or higher-resolution image.";
const CAMERA_FAILURE_MESSAGE: &str = "Failed to access camera.";
const SUCCESS_MESSAGE: &str = "Face verification successful.";

/// Exit status when the live face was not verified (no match, cancelled, expired).
const EXIT_NOT_VERIFIED: u8 = 1;
/// Exit status when the document could not provide a reference face.
const EXIT_DOCUMENT: u8 = 2;
/// Exit status when the camera could not be opened or read.
const EXIT_CAMERA: u8 = 3;
/// Exit status when a second interrupt abandons a capture thread that will not stop.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "facecheck",
    version,
    about = "Verify a live webcam face against an identity document photo"
)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facecheck/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the document face, then match it against the live camera
    Verify(VerifyArgs),
    /// Extract and report the document face only
    Extract {
        /// Identity document image (JPEG or PNG)
        #[arg(short, long)]
        document: PathBuf,
        /// Print the reference face, including its embedding, as JSON
        #[arg(long)]
        json: bool,
    },
    /// List video capture devices
    Devices,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct VerifyArgs {
    /// Identity document image (JPEG or PNG)
    #[arg(short, long)]
    document: PathBuf,
    /// V4L2 device path
    #[arg(long)]
    camera: Option<String>,
    /// Maximum embedding distance accepted as a match
    #[arg(long)]
    threshold: Option<f32>,
    /// Give up after this many analysed frames
    #[arg(long)]
    max_frames: Option<u64>,
    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Write the latest annotated frame to this PNG
    #[arg(long, value_name = "PNG")]
    preview: Option<PathBuf>,
    /// Use the first face when the document shows several
    #[arg(long)]
    allow_multiple_faces: bool,
}

impl VerifyArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(camera) = &self.camera {
            config.camera_device = camera.clone();
        }
        if let Some(threshold) = self.threshold {
            config.match_threshold = threshold;
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = Some(max_frames);
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if self.allow_multiple_faces {
            config.multiple_faces = facecheck_core::MultipleFacePolicy::UseFirst;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Verify(args) => {
            args.apply(&mut config);
            config.validate()?;
            verify(config, args).await
        }
        Commands::Extract { document, json } => {
            config.validate()?;
            extract(config, document, json).await
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found.");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load the models and extract the reference face on a blocking thread.
async fn prepare_reference(
    config: &Config,
    document: &Path,
) -> Result<(OnnxFaceAnalyzer, Result<ReferenceFace, ReferenceError>)> {
    let paths = config.model_paths();
    let options = config.reference_options();
    let document = document.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<_> {
        let mut analyzer = OnnxFaceAnalyzer::load(&paths).with_context(|| {
            format!("failed to load face models from {}", paths.detector.display())
        })?;
        tracing::info!("face models loaded");
        let reference = facecheck_core::load_document(&document)
            .and_then(|image| facecheck_core::extract_reference(&mut analyzer, &image, &options));
        Ok((analyzer, reference))
    })
    .await
    .context("reference extraction task failed")?
}

/// Exit status plus the line shown to the user for a finished command.
#[derive(Debug, PartialEq, Eq)]
struct Report {
    code: u8,
    message: Option<String>,
    to_stderr: bool,
}

impl Report {
    fn failure(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            to_stderr: true,
        }
    }

    fn emit(&self) -> ExitCode {
        match (&self.message, self.to_stderr) {
            (Some(message), true) => eprintln!("{message}"),
            (Some(message), false) => println!("{message}"),
            (None, _) => {}
        }
        ExitCode::from(self.code)
    }
}

fn reference_report(err: &ReferenceError) -> Report {
    let message = match err {
        ReferenceError::DocumentFaceNotFound => NO_FACE_MESSAGE.to_string(),
        ReferenceError::AmbiguousDocument { count } => format!(
            "Document shows {count} faces. Use a photo with exactly one face, or pass --allow-multiple-faces."
        ),
        other => other.to_string(),
    };
    Report::failure(EXIT_DOCUMENT, message)
}

fn session_report(outcome: &Result<SessionOutcome, SessionError>) -> Report {
    match outcome {
        Ok(SessionOutcome::Matched(_)) => Report {
            code: 0,
            message: Some(SUCCESS_MESSAGE.to_string()),
            to_stderr: false,
        },
        Ok(SessionOutcome::Cancelled { .. } | SessionOutcome::Expired { .. }) => Report {
            code: EXIT_NOT_VERIFIED,
            message: None,
            to_stderr: false,
        },
        Err(SessionError::CameraAccessFailure(_)) => {
            Report::failure(EXIT_CAMERA, CAMERA_FAILURE_MESSAGE)
        }
        Err(e @ SessionError::AlreadyFinished(_)) => {
            Report::failure(EXIT_NOT_VERIFIED, e.to_string())
        }
    }
}

enum Waited<T> {
    Finished(T),
    /// The task was still running after a second interrupt.
    Abandoned,
}

/// Wait for the session task. The first interrupt cancels the session and
/// keeps waiting; a second one gives up on the task.
async fn wait_for_session<T, F, Fut>(
    mut task: JoinHandle<T>,
    cancel: &CancelToken,
    mut interrupt: F,
) -> Result<Waited<T>, JoinError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        joined = &mut task => return joined.map(Waited::Finished),
        _ = interrupt() => {
            tracing::info!("interrupt received; cancelling verification");
            cancel.cancel();
        }
    }
    tokio::select! {
        joined = &mut task => joined.map(Waited::Finished),
        _ = interrupt() => {
            tracing::warn!("second interrupt; abandoning camera thread");
            Ok(Waited::Abandoned)
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

async fn extract(config: Config, document: PathBuf, json: bool) -> Result<ExitCode> {
    let (_, reference) = prepare_reference(&config, &document).await?;
    let reference = match reference {
        Ok(reference) => reference,
        Err(e) => {
            tracing::debug!(error = ?e, "reference extraction failed");
            return Ok(reference_report(&e).emit());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reference)?);
    } else {
        let region = reference.region();
        println!(
            "Face found: top={} right={} bottom={} left={} (detection confidence {:.2}, {} face(s) in document)",
            region.top,
            region.right,
            region.bottom,
            region.left,
            reference.detection_confidence(),
            reference.faces_detected(),
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn verify(config: Config, args: VerifyArgs) -> Result<ExitCode> {
    let (mut analyzer, reference) = prepare_reference(&config, &args.document).await?;
    let reference = match reference {
        Ok(reference) => reference,
        Err(e) => {
            tracing::debug!(error = ?e, "reference extraction failed");
            return Ok(reference_report(&e).emit());
        }
    };

    let mut session =
        VerificationSession::new(reference, config.matcher(), config.session_config());
    let cancel = CancelToken::new();
    let loop_cancel = cancel.clone();
    let device = config.camera_device.clone();
    let preview = args.preview;

    let task = tokio::task::spawn_blocking(move || {
        let mut renderer = TerminalRenderer::new(std::io::stdout(), preview);
        session.run(
            &mut camera::opener(device),
            &mut analyzer,
            &mut renderer,
            &loop_cancel,
        )
    });

    let outcome = match wait_for_session(task, &cancel, ctrl_c)
        .await
        .context("verification task failed")?
    {
        Waited::Finished(outcome) => outcome,
        Waited::Abandoned => {
            eprintln!("Camera did not stop; exiting.");
            // Returning would wait on the blocked capture thread at runtime shutdown.
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    };

    match &outcome {
        Ok(SessionOutcome::Matched(event)) => tracing::info!(
            frame = event.frame_index,
            distance = event.decision.distance,
            "face verified"
        ),
        Err(SessionError::CameraAccessFailure(e)) => {
            tracing::error!(device = %config.camera_device, error = %e, "camera access failed")
        }
        _ => {}
    }
    Ok(session_report(&outcome).emit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use facecheck_core::{CaptureError, DistanceMatcher, FaceRegion, MatchEvent, SessionState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_flags_override_config() {
        let cli = Cli::parse_from([
            "facecheck",
            "verify",
            "--document",
            "id.jpg",
            "--camera",
            "/dev/video3",
            "--threshold",
            "0.6",
            "--max-frames",
            "90",
            "--timeout",
            "12",
            "--allow-multiple-faces",
        ]);
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.camera_device, "/dev/video3");
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.max_frames, Some(90));
        assert_eq!(config.timeout_secs, Some(12));
        assert_eq!(config.multiple_faces, facecheck_core::MultipleFacePolicy::UseFirst);
        assert_eq!(args.document, PathBuf::from("id.jpg"));
    }

    #[test]
    fn test_verify_without_flags_keeps_config() {
        let cli = Cli::parse_from(["facecheck", "--config", "c.toml", "verify", "-d", "id.png"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        let Commands::Verify(args) = cli.command else {
            panic!("expected verify");
        };

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_document_is_required() {
        assert!(Cli::try_parse_from(["facecheck", "verify"]).is_err());
        assert!(Cli::try_parse_from(["facecheck", "extract"]).is_err());
    }

    #[test]
    fn test_document_without_face_exits_2() {
        let report = reference_report(&ReferenceError::DocumentFaceNotFound);
        assert_eq!(report, Report::failure(EXIT_DOCUMENT, NO_FACE_MESSAGE));
        assert!(report.to_stderr);
    }

    #[test]
    fn test_ambiguous_document_exits_2() {
        let report = reference_report(&ReferenceError::AmbiguousDocument { count: 3 });
        assert_eq!(report.code, 2);
        assert!(report.message.unwrap().starts_with("Document shows 3 faces."));
    }

    #[test]
    fn test_camera_failure_exits_3() {
        let outcome = Err(SessionError::CameraAccessFailure(CaptureError::Open(
            "device busy: /dev/video0".into(),
        )));
        let report = session_report(&outcome);
        assert_eq!(report, Report::failure(EXIT_CAMERA, CAMERA_FAILURE_MESSAGE));
        assert_eq!(report.code, 3);
    }

    #[test]
    fn test_match_exits_0_on_stdout() {
        let event = MatchEvent {
            frame_index: 4,
            face_index: 0,
            region: FaceRegion {
                top: 0,
                right: 10,
                bottom: 10,
                left: 0,
            },
            decision: DistanceMatcher::default().decide(0.2),
        };
        let report = session_report(&Ok(SessionOutcome::Matched(event)));
        assert_eq!(report.code, 0);
        assert_eq!(report.message.as_deref(), Some(SUCCESS_MESSAGE));
        assert!(!report.to_stderr);
    }

    #[test]
    fn test_unverified_outcomes_exit_1_silently() {
        for outcome in [
            Ok(SessionOutcome::Cancelled { frames: 2 }),
            Ok(SessionOutcome::Expired { frames: 300 }),
        ] {
            let report = session_report(&outcome);
            assert_eq!(report.code, EXIT_NOT_VERIFIED);
            assert_eq!(report.message, None);
        }
        let report = session_report(&Err(SessionError::AlreadyFinished(SessionState::Matched)));
        assert_eq!(report.code, EXIT_NOT_VERIFIED);
        assert!(report.to_stderr);
    }

    #[tokio::test]
    async fn test_session_finishes_without_interrupt() {
        let cancel = CancelToken::new();
        let task = tokio::task::spawn_blocking(|| 7);
        let waited = wait_for_session(task, &cancel, std::future::pending::<()>)
            .await
            .unwrap();
        assert!(matches!(waited, Waited::Finished(7)));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_first_interrupt_cancels_and_waits() {
        let cancel = CancelToken::new();
        let loop_cancel = cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            while !loop_cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            "stopped"
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let interrupt = move || {
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if !first {
                    std::future::pending::<()>().await;
                }
            }
        };

        let waited = wait_for_session(task, &cancel, interrupt).await.unwrap();
        assert!(matches!(waited, Waited::Finished("stopped")));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_second_interrupt_abandons_stuck_task() {
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel::<()>();
        // Ignores the token, like a capture thread stuck in the driver.
        let task = tokio::task::spawn_blocking(move || rx.recv().is_ok());

        let waited = wait_for_session(task, &cancel, || async {}).await.unwrap();
        assert!(matches!(waited, Waited::Abandoned));
        assert!(cancel.is_cancelled());
        drop(tx);
    }
}
