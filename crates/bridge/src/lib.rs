pub mod actuator;
pub mod atmosphere;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod host;
pub mod link;
pub mod noise;
pub mod resolver;
pub mod sensors;
pub mod sim;
pub mod types;

pub use actuator::{ActuatorDispatcher, ActuatorOutputs, CmdVel, ExternalCommand, ServoTarget};
pub use bridge::{BridgeDiagnostics, MavlinkBridge, SyncStatus, TimeMode};
pub use config::{BridgeConfig, ChannelConfig, ControlType};
pub use error::{BridgeError, ConfigError};
pub use host::ActuatorSink;
pub use link::{AutopilotLink, MavlinkUdpConfig, MavlinkUdpLink};
pub use resolver::{HostLookup, ResolutionState};
pub use sim::{KinematicConfig, KinematicHost};
pub use types::{ActuatorControls, SensorMessage, SensorSnapshot, UpdateInfo};
