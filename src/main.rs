//! Command line front-end: each subcommand is one "start detection" trigger.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use solar_inspect::{
    CapturedImage, DetectionOutcome, ImageFileSink, Inspector, LoopbackTransport, PeerSession,
    SourceRequest, UploadedFile, init_logger, parse_toml,
};

const ABOUT: &str = "Automated Real-Time Monitoring and AI Fault Detection System for Solar Panels \
Using Advanced Image Detection.\n\nDetects faulty solar panels caused by physical damage, dust, \
animal droppings or snow coverage, and tells them apart from panels in good condition so they \
can be maintained in time.";

#[derive(Parser, Debug)]
#[command(name = "solar_inspect", version, about = "Solar panel fault detection overlay")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, env = "SOLAR_INSPECT_CONFIG", default_value = "assets/configs/app.toml")]
    config: PathBuf,

    /// Confidence threshold, overrides `model.conf`.
    #[arg(long)]
    conf: Option<f32>,

    /// Image file the annotated frames are written to (the display).
    #[arg(long, default_value = "annotated.png")]
    out: PathBuf,

    /// Log every frame.
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect on a remote video link (720p mp4 stream)
    Stream {
        #[arg(long)]
        link: String,
    },
    /// Detect on the configured webcam until Ctrl-C
    Webcam,
    /// Detect on a local video file, handled like an upload
    Upload {
        #[arg(long)]
        file: PathBuf,
    },
    /// Detect on one of the stored sample videos
    Sample {
        #[arg(long, required_unless_present = "list")]
        name: Option<String>,
        /// List the stored sample names
        #[arg(long)]
        list: bool,
    },
    /// Detect on a single still image
    Still {
        #[arg(long)]
        image: PathBuf,
    },
    /// Run a relay-only peer session
    ///
    /// With `--offer`, answers a browser's SDP offer over WebRTC (needs the
    /// `webrtc` feature); without it the local webcam plays the remote peer.
    Live {
        /// SDP offer of the remote peer (raw SDP or browser JSON)
        #[arg(long)]
        offer: Option<PathBuf>,
        /// Where the SDP answer is written
        #[arg(long, default_value = "answer.sdp")]
        answer: PathBuf,
    },
    /// Show the project description and help image
    About,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let project_root = std::env::current_dir().context("cannot read working directory")?;
    let config = parse_toml(&args.config, &project_root)
        .with_context(|| format!("Failed to parse TOML config: {:?}", args.config))?;

    match &args.command {
        Command::About => {
            println!("{ABOUT}");
            if let Some(help_image) = &config.help_image {
                println!("\nHelp image: {}", help_image.display());
            }
            return Ok(());
        }
        Command::Sample { list: true, .. } => {
            for name in config.source.videos.keys() {
                println!("{name}");
            }
            return Ok(());
        }
        _ => {}
    }

    let mut inspector = Inspector::from_config(config).context("Failed to load model")?;
    if let Some(conf) = args.conf {
        inspector.set_conf(conf);
    }
    let inspector = Arc::new(inspector);

    let stopper = Arc::clone(&inspector);
    ctrlc::set_handler(move || {
        tracing::info!("Stop requested");
        stopper.stop();
    })
    .context("error setting Ctrl-C handler")?;

    let request = match &args.command {
        Command::Stream { link } => SourceRequest::RemoteStream { link: link.clone() },
        Command::Webcam => SourceRequest::Webcam,
        Command::Upload { file } => SourceRequest::Upload(UploadedFile {
            name: file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bytes: std::fs::read(file).with_context(|| format!("cannot read {file:?}"))?,
        }),
        Command::Sample { name, .. } => SourceRequest::Sample {
            name: name.clone().unwrap_or_default(),
        },
        Command::Still { image } => SourceRequest::Still(CapturedImage {
            bytes: std::fs::read(image).with_context(|| format!("cannot read {image:?}"))?,
        }),
        Command::Live { offer, answer } => {
            return run_live(&inspector, offer.as_deref(), answer, &args.out);
        }
        Command::About => unreachable!("handled above"),
    };

    let mut sink = ImageFileSink::new(&args.out);
    let outcome = inspector.detect(&request, &mut sink);
    match &outcome {
        DetectionOutcome::Completed(report) if report.is_success() => {
            tracing::info!("{}", report);
            tracing::info!("Last annotated frame written to {:?}", args.out);
            Ok(())
        }
        other => bail!(other.user_message()),
    }
}

fn run_live(inspector: &Inspector, offer: Option<&Path>, answer: &Path, out: &Path) -> Result<()> {
    let provider = inspector.config().relay.provider();
    match offer {
        Some(offer) => run_webrtc(inspector, provider.as_ref(), offer, answer),
        None => {
            // the webcam is only opened once the relay configuration is accepted
            let source_config = inspector.config().source.clone();
            let mut transport = LoopbackTransport::deferred(
                move || SourceRequest::Webcam.open(&source_config),
                ImageFileSink::new(out),
            );
            let session = inspector
                .start_live(provider.as_ref(), &mut transport)
                .context("peer session did not start")?;
            drive_session(inspector, session);
            transport.close();
            Ok(())
        }
    }
}

#[cfg(feature = "webrtc")]
fn run_webrtc(
    inspector: &Inspector,
    provider: &dyn solar_inspect::IceServerProvider,
    offer: &Path,
    answer: &Path,
) -> Result<()> {
    use solar_inspect::{FileSignaling, WebRtcTransport};

    let mut transport = WebRtcTransport::new(FileSignaling::new(offer, answer))?;
    let session = inspector
        .start_live(provider, &mut transport)
        .context("peer session did not start")?;
    drive_session(inspector, session);
    transport.close();
    tracing::info!("{} inbound frames dropped by the transport", transport.dropped());
    Ok(())
}

#[cfg(not(feature = "webrtc"))]
fn run_webrtc(
    _inspector: &Inspector,
    _provider: &dyn solar_inspect::IceServerProvider,
    _offer: &Path,
    _answer: &Path,
) -> Result<()> {
    bail!("answering a browser offer needs a build with the `webrtc` feature")
}

/// Block until the transport closes the session or Ctrl-C is pressed.
fn drive_session(inspector: &Inspector, session: PeerSession) {
    tracing::info!("Live session running, press Ctrl-C to stop");
    while session.is_running() && !inspector.controls().stop_signal().is_raised() {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    let stats = session.stop();
    tracing::info!(
        "Live session closed: {} frames annotated, {} dropped",
        stats.frames_transformed,
        stats.frames_dropped
    );
}
