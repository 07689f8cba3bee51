use drive_assist::device::{InputDevice, ListenerError, ScriptedWheel};
use drive_assist::drive_handle::{
    TASK_AXIS_SHAPING, TASK_DEVICE_ARBITRATION, TASK_FORCE_FEEDBACK, TASK_INPUT_RECORDER,
};
use drive_assist::feedback::{CollectingSink, FeedbackPattern};
use drive_assist::keyboard::{KeyInjector, ScriptedKey, ScriptedKeySource};
use drive_assist::persistence::{KeyBindings, SteeringMode};
use drive_assist::DriveAssist;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

struct Rig {
    assist: DriveAssist,
    keys: KeyInjector,
    wheel: ScriptedWheel,
    feedback: CollectingSink,
}

fn rig() -> Rig {
    let source = ScriptedKeySource::new();
    let keys = source.injector();
    let wheel = ScriptedWheel::new();
    let feedback = CollectingSink::new();
    let assist = DriveAssist::builder()
        .key_source(source)
        .wheel_source(wheel.clone())
        .feedback_sink(feedback.clone())
        .spawn()
        .unwrap();
    Rig {
        assist,
        keys,
        wheel,
        feedback,
    }
}

fn device_log(assist: &DriveAssist) -> Arc<Mutex<Vec<InputDevice>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    assist.on_device_changed("test", move |device| -> Result<(), ListenerError> {
        sink.lock().push(device);
        Ok(())
    });
    seen
}

#[tokio::test(start_paused = true)]
async fn test_held_key_steers_and_release_recenters() {
    let rig = rig();
    assert!(rig.keys.press("d", Instant::now()));
    sleep(Duration::from_millis(500)).await;
    let steering = rig.assist.get_axes().steering;
    assert!(steering > 0.3, "steering = {}", steering);
    assert!(rig.assist.virtual_axes().steering > 16384);

    rig.keys.release("d", Instant::now());
    sleep(Duration::from_millis(500)).await;
    assert!(rig.assist.get_axes().steering.abs() < 0.01);

    rig.assist.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scripted_throttle_and_brake() {
    let source = ScriptedKeySource::with_script(vec![
        ScriptedKey::down("w", 0),
        ScriptedKey::down("space", 0),
    ]);
    let replay = source.clone();
    let assist = DriveAssist::builder().key_source(source).spawn().unwrap();

    assert_eq!(replay.replay(Instant::now()), 2);
    sleep(Duration::from_millis(400)).await;
    let output = assist.output();
    assert!(output.axes.throttle > 0.3);
    assert_eq!(output.axes.brake, 0.0);
    assert!(output.buttons.clutch);
    assert!(!output.buttons.handbrake);

    assist.on_key_transition("w", false, Instant::now());
    assist.on_key_transition("s", true, Instant::now());
    sleep(Duration::from_millis(400)).await;
    let axes = assist.get_axes();
    assert!(axes.throttle < 0.05);
    assert!(axes.brake > 0.3);

    assist.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wheel_takes_over_and_hands_back() {
    let rig = rig();
    let devices = device_log(&rig.assist);

    rig.keys.press("w", Instant::now());
    sleep(Duration::from_millis(300)).await;
    assert_eq!(rig.assist.current_device(), InputDevice::Keyboard);

    rig.keys.release("w", Instant::now());
    sleep(Duration::from_millis(800)).await;
    assert_eq!(rig.assist.current_device(), InputDevice::Unknown);

    rig.wheel.set_active(true);
    sleep(Duration::from_millis(250)).await;
    assert_eq!(rig.assist.current_device(), InputDevice::SteeringWheel);

    // Shaping is paused while the wheel drives
    let held = rig.assist.output().tick;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.assist.output().tick, held);

    rig.wheel.set_active(false);
    sleep(Duration::from_millis(800)).await;
    assert_eq!(rig.assist.current_device(), InputDevice::Unknown);
    assert!(rig.assist.output().tick > held);

    assert_eq!(
        *devices.lock(),
        vec![
            InputDevice::Keyboard,
            InputDevice::Unknown,
            InputDevice::SteeringWheel,
            InputDevice::Unknown
        ]
    );
    rig.assist.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rebinding_applies_to_next_key_event() {
    let rig = rig();
    let mut bindings = KeyBindings::default();
    bindings.throttle = "up".to_string();
    rig.assist.set_key_bindings(bindings);

    rig.keys.press("w", Instant::now());
    sleep(Duration::from_millis(300)).await;
    assert_eq!(rig.assist.get_axes().throttle, 0.0);

    rig.keys.press("up", Instant::now());
    sleep(Duration::from_millis(300)).await;
    assert!(rig.assist.get_axes().throttle > 0.2);

    rig.assist.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_game_profile_and_tunables() {
    let rig = rig();

    let vehicle = rig.assist.set_active_game("Assetto_Corsa.exe").unwrap();
    assert_eq!(vehicle.tire_grip, 1.2);
    assert_eq!(rig.assist.config().steering_mode, SteeringMode::Race);
    assert_eq!(rig.assist.config().vibration_strength, 0.7);

    let config = rig.assist.apply_tunable("deadzone", "0.1").unwrap();
    assert_eq!(config.deadzone_size, 0.1);
    assert!(rig.assist.apply_tunable("deadzone", "2.0").is_err());
    assert!(rig.assist.apply_tunable("warp_drive", "1").is_err());
    assert_eq!(rig.assist.config().deadzone_size, 0.1);

    rig.assist.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_feedback_and_recording_follow_outputs() {
    let rig = rig();
    rig.assist.set_vehicle_speed(120.0);
    assert!(rig.assist.recorder().start());

    rig.keys.press("a", Instant::now());
    sleep(Duration::from_millis(400)).await;
    assert!(rig.assist.trigger_feedback(FeedbackPattern::Curb, 0.5));
    sleep(Duration::from_millis(100)).await;

    let take = rig.assist.recorder().stop().unwrap();
    assert!(take.frames.len() > 10);
    assert!(take.frames.last().unwrap().axes.steering < -0.3);

    let patterns: Vec<FeedbackPattern> = rig.feedback.events().iter().map(|e| e.pattern).collect();
    assert!(patterns.contains(&FeedbackPattern::Road));
    assert!(patterns.contains(&FeedbackPattern::Curb));

    rig.assist.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_task() {
    let rig = rig();
    for task in [
        TASK_AXIS_SHAPING,
        TASK_DEVICE_ARBITRATION,
        TASK_FORCE_FEEDBACK,
        TASK_INPUT_RECORDER,
    ] {
        assert!(rig.assist.is_running(task), "{} not running", task);
    }

    let report = rig.assist.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(report.joined.len(), 4);
    assert!(!rig.keys.press("w", Instant::now()));
}
