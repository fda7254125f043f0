//! Health monitoring for isolation channels

/// Health status of an isolation channel
///
/// # Examples
///
/// ```
/// use isolation_channel::{Channel, IsolationChannel, LoopbackChannel};
///
/// let pool = IsolationChannel::create(|| LoopbackChannel::new("localhost:443"));
///
/// let health = pool.get_health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_channels, 1);
///
/// pool.shutdown();
/// assert!(!pool.get_health_status().is_healthy());
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool still accepts new calls
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current leased ratio (0.0 to 1.0)
    pub utilization: f64,

    pub idle_channels: usize,

    pub leased_channels: usize,

    pub shutdown_started: bool,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(idle: usize, leased: usize, shutdown_started: bool) -> Self {
        let total = idle + leased;
        let utilization = if total > 0 {
            leased as f64 / total as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        // Growth is expected, so this alone is not unhealthy
        if idle == 0 && leased > 0 {
            warnings.push(format!(
                "All {} channels leased, next call creates a new channel",
                leased
            ));
        }

        if shutdown_started {
            warnings.push("Shutdown started".to_string());
            is_healthy = false;
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_channels: idle,
            leased_channels: leased,
            shutdown_started,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
