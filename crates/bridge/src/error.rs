/// Startup-time configuration errors. Any of these aborts `configure`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Too many actuator channels: {count} (max {max})")]
    TooManyChannels { count: usize, max: usize },

    #[error("Channel {channel}: input index {index} outside command vector (len {max})")]
    ChannelIndexOutOfRange {
        channel: usize,
        index: usize,
        max: usize,
    },

    #[error("Channel {channel}: {field} must be finite")]
    NonFiniteChannelValue { channel: usize, field: &'static str },

    #[error("update_skip_factor must be at least 1")]
    InvalidSkipFactor,

    #[error("speed_factor must be finite and positive, got {0}")]
    InvalidSpeedFactor(f64),

    #[error("Noise parameters for {field} are invalid (mean {mean}, stddev {stddev})")]
    InvalidNoise {
        field: &'static str,
        mean: f64,
        stddev: f64,
    },

    #[error("{0} must be finite and non-negative")]
    InvalidInterval(&'static str),

    #[error("cmd_vel configuration invalid: {0}")]
    InvalidCmdVel(String),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during bridge operation.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Could not resolve {host} after {attempts} attempts")]
    ResolutionFailed { host: String, attempts: u32 },

    #[error("Link not ready")]
    NotReady,

    #[error("Shutdown requested")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
