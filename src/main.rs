use color_eyre::{eyre::eyre, Result};
use drive_assist::device::InputDevice;
use drive_assist::feedback::LogSink;
use drive_assist::persistence::{recordings_dir, settings_path, TomlSettingsStore};
use drive_assist::{DriveAssist, DriveAssistBuilder};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = settings_path()?;
    info!("Loading settings from {}", path.display());
    let mut store = TomlSettingsStore::load_or_create(&path).await?;
    let config = store.drive_config();

    let builder = DriveAssist::builder()
        .config(config)
        .recordings_dir(recordings_dir()?)
        .feedback_sink(LogSink);
    let builder = with_key_source(builder)?;
    let builder = with_wheel_source(builder);

    let assist = builder
        .spawn()
        .map_err(|e| eyre!("Failed to start drive assist: {}", e))?;

    assist.on_device_changed("log", |device| {
        match device {
            InputDevice::SteeringWheel => info!("Wheel in use, keyboard shaping paused"),
            InputDevice::Keyboard => info!("Keyboard in use"),
            InputDevice::Unknown => debug!("No active input device"),
        }
        Ok(())
    });

    let mut status = interval(Duration::from_secs(1));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = status.tick() => {
                let output = assist.output();
                debug!(
                    "Tick {} S:{:.3} T:{:.3} B:{:.3} ({})",
                    output.tick,
                    output.axes.steering,
                    output.axes.throttle,
                    output.axes.brake,
                    assist.current_device()
                );
            }
        }
    }

    info!("Ctrl-C received, saving settings");
    if let Err(e) = assist.save_config(&mut store).await {
        warn!("Failed to save settings: {}", e);
    }

    let report = assist.shutdown().await;
    if !report.is_clean() {
        warn!("Unclean shutdown: {:?}", report);
    }
    Ok(())
}

#[cfg(feature = "os-keyboard")]
fn with_key_source(builder: DriveAssistBuilder) -> Result<DriveAssistBuilder> {
    use drive_assist::keyboard::DeviceQueryKeySource;
    Ok(builder.key_source(DeviceQueryKeySource::default()))
}

#[cfg(not(feature = "os-keyboard"))]
fn with_key_source(_builder: DriveAssistBuilder) -> Result<DriveAssistBuilder> {
    Err(eyre!(
        "No keyboard source available, rebuild with the `os-keyboard` feature"
    ))
}

#[cfg(feature = "wheel")]
fn with_wheel_source(builder: DriveAssistBuilder) -> DriveAssistBuilder {
    use drive_assist::device::GilrsWheelSource;
    match GilrsWheelSource::spawn(0.1) {
        Ok(wheel) => builder.wheel_source(wheel),
        Err(e) => {
            warn!("Wheel detection disabled: {}", e);
            builder
        }
    }
}

#[cfg(not(feature = "wheel"))]
fn with_wheel_source(builder: DriveAssistBuilder) -> DriveAssistBuilder {
    info!("Built without wheel support, keyboard only");
    builder
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
