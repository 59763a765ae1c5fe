//! `device-mirror` entry point.
//!
//! Attaches to one running device, mirrors its primary display and logs what
//! happens.  There is no window: frames end up in a logging [`FrameSink`].
//!
//! # Architecture
//!
//! ```text
//! main()
//!  ├─ resolve registration file   (--registration, or --registration-dir + --serial)
//!  ├─ load AppConfig              (--config or the platform config path)
//!  ├─ SessionController::new(TcpChannelFactory, FileConfigurationSource)
//!  │    └─ connect()  ── state changes ──▶ watch channel ──▶ main loop
//!  ├─ UiThread + DisplayView(display 0) ──▶ LoggingFrameSink
//!  └─ wait for Ctrl-C, --max-frames frames, or Disconnected
//!       └─ optional shutdown, dispose view and session
//! ```
//!
//! Once connected the device's display configurations are fetched and the
//! arrangement the layout optimizer picks for them is logged as JSON.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use mirror_core::domain::display::Size;
use mirror_core::domain::layout::{best_layout, PanelLayout};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mirror_client::application::connection::ConnectionState;
use mirror_client::application::device::DeviceId;
use mirror_client::application::display_view::DisplayView;
use mirror_client::application::frame_stream::Screenshot;
use mirror_client::application::session::SessionController;
use mirror_client::application::ui::FrameSink;
use mirror_client::infrastructure::network::TcpChannelFactory;
use mirror_client::infrastructure::storage::config::{config_file_path, load_config, AppConfig};
use mirror_client::infrastructure::storage::device_config::FileConfigurationSource;
use mirror_client::infrastructure::storage::registration::{
    default_registration_dir, read_registration, scan_registration_dir,
};
use mirror_client::infrastructure::ui_thread::UiThread;

/// How long teardown waits for the device to go away after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Mirror the display of a running virtual device.
#[derive(Debug, Parser)]
#[command(name = "device-mirror", version, about)]
struct Args {
    /// Registration file of the device (`pid_<pid>.ini`).
    #[arg(long, conflicts_with = "registration_dir")]
    registration: Option<PathBuf>,

    /// Directory scanned for registration files.
    #[arg(long, env = "DEVICE_MIRROR_REGISTRATION_DIR")]
    registration_dir: Option<PathBuf>,

    /// Serial number of the device to attach to, e.g. `emulator-5554`.
    /// Defaults to the first device found.
    #[arg(long)]
    serial: Option<String>,

    /// Configuration file.  Defaults to the platform config path.
    #[arg(long, env = "DEVICE_MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level.
    #[arg(long)]
    log_level: Option<String>,

    /// Power the device off when exiting.
    #[arg(long)]
    shutdown_on_exit: bool,

    /// Exit after this many frames were displayed.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Size of the simulated viewport, `WIDTHxHEIGHT`.
    #[arg(long, default_value = "1080x1920", value_parser = parse_size)]
    viewport: Size,
}

fn parse_size(value: &str) -> Result<Size, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let width = w.trim().parse::<u32>().map_err(|e| format!("invalid width: {e}"))?;
    let height = h.trim().parse::<u32>().map_err(|e| format!("invalid height: {e}"))?;
    if width == 0 || height == 0 {
        return Err("viewport must not be empty".to_string());
    }
    Ok(Size::new(width, height))
}

/// Logs every displayed frame and wakes the main loop once the frame budget
/// is used up.
struct LoggingFrameSink {
    frames: AtomicU64,
    limit: Option<u64>,
    done: Arc<Notify>,
}

impl FrameSink for LoggingFrameSink {
    fn frame_ready(&self, display_id: u32, screenshot: &Arc<Screenshot>) {
        let count = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        let shape = &screenshot.shape;
        info!(
            "display {display_id}: frame {} {}x{} rotation {:?}",
            shape.frame_number, shape.width, shape.height, shape.rotation
        );
        if self.limit.is_some_and(|limit| count >= limit) {
            self.done.notify_one();
        }
    }

    fn zoom_reset(&self, display_id: u32) {
        info!("display {display_id}: aspect ratio changed, zoom reset to fit");
    }
}

fn resolve_device(args: &Args, config: &AppConfig) -> anyhow::Result<DeviceId> {
    if let Some(path) = &args.registration {
        return read_registration(path).with_context(|| format!("reading {}", path.display()));
    }

    let dir = args
        .registration_dir
        .clone()
        .or_else(|| config.client.registration_dir.clone())
        .or_else(default_registration_dir)
        .context("no registration directory configured")?;
    let devices = scan_registration_dir(&dir).with_context(|| format!("scanning {}", dir.display()))?;

    let device = match &args.serial {
        Some(serial) => devices.into_iter().find(|d| &d.serial_number() == serial),
        None => devices.into_iter().next(),
    };
    match device {
        Some(device) => Ok(device),
        None => bail!("no matching running device in {}", dir.display()),
    }
}

async fn log_display_layout(session: &SessionController, viewport: Size) {
    let displays = match session.get_display_configurations().await {
        Ok(configurations) => configurations.displays,
        Err(status) => {
            warn!("display configurations unavailable: {status}");
            return;
        }
    };
    let sizes: Vec<Size> = displays.iter().map(|d| Size::new(d.width, d.height)).collect();
    let ids: Vec<u32> = displays.iter().map(|d| d.display).collect();

    let layout = best_layout(viewport, &sizes).and_then(|node| PanelLayout::from_layout_node(&node, &ids));
    match layout.and_then(|layout| layout.to_json()) {
        Ok(json) => info!("display layout: {json}"),
        Err(e) => warn!("no layout for {} display(s): {e}", sizes.len()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config_file_path()?,
    };
    let config = load_config(&config_path).with_context(|| format!("loading {}", config_path.display()))?;

    let filter = args.log_level.clone().unwrap_or_else(|| config.client.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let device = resolve_device(&args, &config)?;
    info!("attaching to {} ({})", device.display_name(), device.serial_number());

    // ── Session ───────────────────────────────────────────────────────────────
    let factory = Arc::new(TcpChannelFactory::new(tokio::runtime::Handle::current()));
    let source = Arc::new(FileConfigurationSource::new(config.client.sdk_root.clone()));
    let session = SessionController::new(device, factory, source, config.session_settings());

    let (state_tx, mut state_rx) = watch::channel(ConnectionState::NotInitialized);
    let serial = session.device_id().serial_number();
    session.add_listener(Arc::new(move |state: ConnectionState| {
        info!("{serial}: {state:?}");
        state_tx.send_replace(state);
    }));

    // ── Display ───────────────────────────────────────────────────────────────
    let ui = UiThread::spawn("device-mirror-ui").context("starting UI thread")?;
    let done = Arc::new(Notify::new());
    let sink = Arc::new(LoggingFrameSink {
        frames: AtomicU64::new(0),
        limit: args.max_frames,
        done: Arc::clone(&done),
    });
    let view = DisplayView::new(
        session.clone(),
        0,
        Arc::new(ui.dispatcher()),
        Arc::clone(&sink) as Arc<dyn FrameSink>,
        config.display_view_settings(),
    );
    view.set_viewport_size(args.viewport);

    session.connect().await;

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut layout_logged = false;
    loop {
        let state = *state_rx.borrow_and_update();
        match state {
            ConnectionState::Disconnected => {
                warn!("device disconnected");
                break;
            }
            ConnectionState::Connected if !layout_logged => {
                layout_logged = true;
                log_display_layout(&session, args.viewport).await;
            }
            _ => {}
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = done.notified() => {
                info!("frame limit reached");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    if args.shutdown_on_exit {
        session.shutdown();
        let stopped = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while session.is_connected() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });
        if stopped.await.is_err() {
            warn!("device still running {} s after the shutdown request", SHUTDOWN_GRACE.as_secs());
        }
    }
    info!("{}", view.frame_stats());
    view.dispose();
    session.dispose();
    drop(ui);

    info!("device-mirror stopped");
    Ok(())
}
