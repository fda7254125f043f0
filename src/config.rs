//! Isolation channel configuration options

use std::time::Duration;

/// Configuration for isolation channel behavior
///
/// # Examples
///
/// ```
/// use isolation_channel::IsolationConfig;
/// use std::time::Duration;
///
/// let config = IsolationConfig::new()
///     .with_name("windmill")
///     .with_warmup(4)
///     .with_shutdown_grace_period(Duration::from_secs(5));
///
/// assert_eq!(config.name, "windmill");
/// assert_eq!(config.warmup_size, Some(4));
/// ```
#[derive(Debug, Clone)]
pub struct IsolationConfig {
    /// Name used in log lines and exported metric labels
    pub name: String,

    /// Channels to pre-create beyond the seed channel
    pub warmup_size: Option<usize>,

    /// How long a graceful close waits before escalating to a forced shutdown
    pub shutdown_grace_period: Duration,

    /// Timeout for async operations
    pub operation_timeout: Option<Duration>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            name: "isolation".to_string(),
            warmup_size: None,
            shutdown_grace_period: Duration::from_secs(10),
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl IsolationConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set warm-up size
    pub fn with_warmup(mut self, size: usize) -> Self {
        self.warmup_size = Some(size);
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    /// Set operation timeout
    ///
    /// # Examples
    ///
    /// ```
    /// use isolation_channel::IsolationConfig;
    /// use std::time::Duration;
    ///
    /// let config = IsolationConfig::new().with_timeout(Duration::from_secs(2));
    /// assert_eq!(config.operation_timeout, Some(Duration::from_secs(2)));
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}
