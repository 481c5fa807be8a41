use anyhow::{bail, Context, Result};
use shutterbug::devices::order_cameras;
use shutterbug::platform::DeviceProvider;
use shutterbug::types::{InterruptionReason, RotationAngles, SessionNotification};
use shutterbug::{
    Backend, CaptureDevice, CaptureMode, CaptureService, Point, ShutterbugConfig,
    SimulatedPlatform,
};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: shutterbug-cli <list-devices|watch-devices|demo|monitor|config> [args]"
        );
        std::process::exit(1);
    }

    let config = load_config(&args)?;
    shutterbug::init_logging(&config.logging.level);

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&args),
        "watch-devices" => cmd_watch_devices().await,
        "demo" => cmd_demo(&args, config).await,
        "monitor" => cmd_monitor(config).await,
        "config" => cmd_config(&args, &config),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn load_config(args: &[String]) -> Result<ShutterbugConfig> {
    match flag_value(args, "--config") {
        Some(path) => ShutterbugConfig::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path)),
        None => Ok(ShutterbugConfig::load_or_default()),
    }
}

fn device_provider() -> Arc<dyn DeviceProvider> {
    #[cfg(feature = "native")]
    {
        Arc::new(shutterbug::platform::NativeDeviceProvider::new())
    }
    #[cfg(not(feature = "native"))]
    {
        Arc::new(SimulatedPlatform::with_fixture_devices())
    }
}

fn cmd_list_devices(args: &[String]) -> Result<()> {
    let provider = device_provider();
    let cameras = order_cameras(provider.video_devices());
    let microphones = provider.audio_devices();

    if args.contains(&"--json".to_string()) {
        let all: Vec<&CaptureDevice> = cameras.iter().chain(microphones.iter()).collect();
        println!("{}", serde_json::to_string(&all)?);
    } else {
        for d in cameras.iter().chain(microphones.iter()) {
            println!("{}: {} ({:?}, {:?})", d.id, d.name, d.media_type, d.position);
        }
    }
    Ok(())
}

/// Re-scans cameras until Ctrl-C and prints each new preferred camera.
#[cfg(feature = "native")]
async fn cmd_watch_devices() -> Result<()> {
    let running = stop_flag()?;
    let provider = shutterbug::platform::NativeDeviceProvider::new();
    let mut preferred = provider.watch_system_preferred_camera();
    print_preferred(preferred.borrow_and_update().as_ref());

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(DEVICE_POLL_INTERVAL).await;
        provider.refresh();
        if preferred.has_changed()? {
            print_preferred(preferred.borrow_and_update().as_ref());
        }
    }
    println!("Stopped");
    Ok(())
}

#[cfg(not(feature = "native"))]
async fn cmd_watch_devices() -> Result<()> {
    bail!("watch-devices needs the `native` feature")
}

#[cfg(feature = "native")]
fn print_preferred(device: Option<&CaptureDevice>) {
    match device {
        Some(d) => println!("preferred: {} ({})", d.name, d.id),
        None => println!("preferred: none"),
    }
}

fn stop_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

/// Scripted session against the simulated platform.
async fn cmd_demo(args: &[String], config: ShutterbugConfig) -> Result<()> {
    let json = args.contains(&"--json".to_string());
    let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
    let service = CaptureService::new(Backend::simulated(platform.clone()), config.clone());

    let mut state = config.capture.camera_state();
    state.capture_mode = CaptureMode::Photo;
    service.start(state).await?;
    report(json, "started", &active_name(&service))?;

    service.set_preview_bounds(390.0, 844.0).await;
    let tap = Point::new(195.0, 300.0);
    service.focus_and_expose(tap).await?;
    report(json, "focus", &format!("tap at ({}, {})", tap.x, tap.y))?;

    let photo = service.capture_photo(state.photo_features()).await?;
    report(
        json,
        "photo",
        &format!("{} bytes, {:?}", photo.data.len(), photo.codec),
    )?;

    let next = service
        .select_next_video_device()
        .await
        .map(|d| d.name)
        .unwrap_or_default();
    report(json, "camera", &next)?;

    service.set_capture_mode(CaptureMode::Video).await?;
    service.start_recording().await?;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let movie = service.stop_recording().await?;
    report(
        json,
        "movie",
        &format!("{} ({:.1}s)", movie.path.display(), movie.duration.as_secs_f64()),
    )?;

    let snapshot = platform.session_snapshot();
    if json {
        println!("{}", serde_json::to_string(&snapshot.inputs)?);
    } else {
        println!("Session inputs: {}", snapshot.inputs.join(", "));
    }
    Ok(())
}

fn active_name(service: &CaptureService) -> String {
    service
        .current_device()
        .borrow()
        .as_ref()
        .map(|d| d.name.clone())
        .unwrap_or_default()
}

fn report(json: bool, event: &str, detail: &str) -> Result<()> {
    if json {
        let line = serde_json::json!({ "event": event, "detail": detail });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("{:>8}: {}", event, detail);
    }
    Ok(())
}

/// Prints published state while the simulated device is rotated.
async fn cmd_monitor(config: ShutterbugConfig) -> Result<()> {
    let running = stop_flag()?;

    let platform = Arc::new(SimulatedPlatform::with_fixture_devices());
    let service = CaptureService::new(Backend::simulated(platform.clone()), config.clone());
    service.start(config.capture.camera_state()).await?;

    let mut rotation = service.preview_rotation_angle();
    let mut interrupted = service.is_interrupted();
    let device_id = service
        .current_device()
        .borrow()
        .as_ref()
        .map(|d| d.id.clone())
        .unwrap_or_default();

    println!("Monitoring {} (Ctrl+C to stop)", device_id);
    let mut tick = 0u32;
    while running.load(Ordering::SeqCst) {
        tick += 1;
        let angle = f64::from(tick % 4) * 90.0;
        platform.set_rotation(
            &device_id,
            RotationAngles {
                preview: angle,
                capture: angle,
            },
        );
        match tick % 10 {
            5 => platform.post_notification(SessionNotification::WasInterrupted(
                InterruptionReason::VideoDeviceInUseByAnotherClient,
            )),
            0 => platform.post_notification(SessionNotification::InterruptionEnded),
            _ => {}
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        if rotation.has_changed()? {
            println!("rotation: {}", *rotation.borrow_and_update());
        }
        if interrupted.has_changed()? {
            println!("interrupted: {}", *interrupted.borrow_and_update());
        }
    }
    println!("Stopped");
    Ok(())
}

fn cmd_config(args: &[String], config: &ShutterbugConfig) -> Result<()> {
    if let Some(path) = flag_value(args, "--write") {
        let path = PathBuf::from(path);
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        config.save_to_file(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
