//! Metrics collection and export for isolation channels

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics data for an isolation channel
///
/// # Examples
///
/// ```
/// use isolation_channel::{IsolationChannel, LoopbackChannel};
///
/// let pool = IsolationChannel::create(|| LoopbackChannel::new("localhost:443"));
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.channels_created, 1);
/// assert_eq!(metrics.idle_channels, 1);
/// assert_eq!(metrics.leased_channels, 0);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Total leases handed out
    pub total_leased: usize,

    /// Total leases returned to the idle set
    pub total_released: usize,

    /// Channels produced by the factory
    pub channels_created: usize,

    /// Calls whose start failed
    pub start_failures: usize,

    /// Terminal notifications discarded as duplicates
    pub duplicate_closes: usize,

    /// Release attempts discarded because the lease was already released
    pub duplicate_releases: usize,

    /// Current idle channels
    pub idle_channels: usize,

    /// Current leased channels
    pub leased_channels: usize,

    /// All channels the pool owns
    pub total_channels: usize,

    /// Leased ratio (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_leased".to_string(), self.total_leased.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("channels_created".to_string(), self.channels_created.to_string());
        metrics.insert("start_failures".to_string(), self.start_failures.to_string());
        metrics.insert("duplicate_closes".to_string(), self.duplicate_closes.to_string());
        metrics.insert("duplicate_releases".to_string(), self.duplicate_releases.to_string());
        metrics.insert("idle_channels".to_string(), self.idle_channels.to_string());
        metrics.insert("leased_channels".to_string(), self.leased_channels.to_string());
        metrics.insert("total_channels".to_string(), self.total_channels.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use isolation_channel::{IsolationChannel, LoopbackChannel};
    /// use std::collections::HashMap;
    ///
    /// let pool = IsolationChannel::create(|| LoopbackChannel::new("localhost:443"));
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "windmill".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("streaming", Some(&tags));
    /// assert!(output.contains("isolation_channel_channels_idle"));
    /// assert!(output.contains("service=\"windmill\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges = [
            ("isolation_channel_channels_idle", "Channels not backing any call", metrics.idle_channels),
            ("isolation_channel_channels_leased", "Channels backing an in-flight call", metrics.leased_channels),
            ("isolation_channel_channels_total", "Channels owned by the pool", metrics.total_channels),
        ];
        for (name, help, value) in gauges {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }

        output.push_str("# HELP isolation_channel_utilization Leased channel ratio\n");
        output.push_str("# TYPE isolation_channel_utilization gauge\n");
        output.push_str(&format!("isolation_channel_utilization{{{}}} {:.2}\n", labels, metrics.utilization));

        let counters = [
            ("isolation_channel_leases_total", "Total leases handed out", metrics.total_leased),
            ("isolation_channel_releases_total", "Total leases returned", metrics.total_released),
            ("isolation_channel_channels_created_total", "Channels produced by the factory", metrics.channels_created),
            ("isolation_channel_start_failures_total", "Calls whose start failed", metrics.start_failures),
            ("isolation_channel_duplicate_closes_total", "Discarded duplicate terminal notifications", metrics.duplicate_closes),
            ("isolation_channel_duplicate_releases_total", "Discarded duplicate releases", metrics.duplicate_releases),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
        }

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
pub(crate) struct MetricsTracker {
    pub total_leased: AtomicUsize,
    pub total_released: AtomicUsize,
    pub channels_created: AtomicUsize,
    pub start_failures: AtomicUsize,
    pub duplicate_closes: AtomicUsize,
    pub duplicate_releases: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            total_leased: AtomicUsize::new(0),
            total_released: AtomicUsize::new(0),
            channels_created: AtomicUsize::new(0),
            start_failures: AtomicUsize::new(0),
            duplicate_closes: AtomicUsize::new(0),
            duplicate_releases: AtomicUsize::new(0),
        }
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, idle: usize, leased: usize) -> PoolMetrics {
        let total = idle + leased;
        let utilization = if total > 0 {
            leased as f64 / total as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_leased: self.total_leased.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            channels_created: self.channels_created.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            duplicate_closes: self.duplicate_closes.load(Ordering::Relaxed),
            duplicate_releases: self.duplicate_releases.load(Ordering::Relaxed),
            idle_channels: idle,
            leased_channels: leased,
            total_channels: total,
            utilization,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
