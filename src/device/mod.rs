//! Input device arbitration
//!
//! [`arbitrator`] decides between keyboard and wheel, [`wheel_source`] holds
//! the samplers that tell it whether a wheel is in use.

pub mod arbitrator;
pub mod wheel_source;

pub use arbitrator::{
    ArbitratorSettings, ArbitratorStats, DeviceActivity, DeviceArbitrator, DeviceListener,
    DeviceListeners, InputDevice, ListenerError,
};
#[cfg(feature = "wheel")]
pub use wheel_source::GilrsWheelSource;
pub use wheel_source::{NoWheel, SampleError, ScriptedWheel, WheelActivitySource};
