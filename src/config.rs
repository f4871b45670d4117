use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// How long `MockAgent::start` waits for the listener before giving up.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for `assert_message_received` / `assert_telemetry_received`.
pub const DEFAULT_ASSERTION_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for a single mock agent instance.
///
/// Each test builds its own configuration and passes it by value, so agents
/// never share ports or lifecycle state.
///
/// # Example
///
/// ```no_run
/// use mock_agent::AgentConfig;
/// use std::time::Duration;
///
/// let config = AgentConfig::builder()
///     .with_port(8126)
///     .with_start_timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub(crate) host: IpAddr,
    pub(crate) port: u16,
    pub(crate) start_timeout: Duration,
    pub(crate) channel_capacity: usize,
}

impl AgentConfig {
    /// Creates a builder for customising the configuration.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn start_timeout(&self) -> Duration {
        self.start_timeout
    }
}

impl Default for AgentConfig {
    /// Localhost, an OS-assigned port, and the default startup timeout.
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            start_timeout: DEFAULT_START_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Builder for creating an [`AgentConfig`].
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    host: Option<IpAddr>,
    port: Option<u16>,
    start_timeout: Option<Duration>,
    channel_capacity: Option<usize>,
}

impl AgentConfigBuilder {
    /// Sets the address to bind to. Defaults to 127.0.0.1.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the port to bind to. Defaults to 0 (OS-assigned).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the startup timeout for `start()`.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    /// Sets the capacity of the message and telemetry broadcast channels.
    ///
    /// An assertion that falls more than this many messages behind skips to
    /// the oldest retained message and keeps draining.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Builds the configuration, filling unset fields with defaults.
    pub fn build(self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            start_timeout: self.start_timeout.unwrap_or(defaults.start_timeout),
            channel_capacity: self.channel_capacity.unwrap_or(defaults.channel_capacity),
        }
    }
}
