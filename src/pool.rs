//! Isolation pool: a channel that leases one dedicated member channel per call

use crate::channel::{CallOptions, Channel, ClientCall, MethodDescriptor};
use crate::config::IsolationConfig;
use crate::errors::{ChannelError, ChannelResult};
use crate::health::HealthStatus;
use crate::lease::LeasedCall;
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Index of a member channel; channels are never removed so ids stay valid
pub(crate) type ChannelId = usize;

struct PoolState<C> {
    channels: Vec<Arc<C>>,
    idle: Vec<ChannelId>,
    leased: BTreeSet<ChannelId>,
    shutdown_started: bool,
}

impl<C> PoolState<C> {
    /// Every member, leased first, each set in its own order
    fn members(&self) -> Vec<Arc<C>> {
        self.leased
            .iter()
            .chain(self.idle.iter())
            .map(|id| Arc::clone(&self.channels[*id]))
            .collect()
    }

    fn add(&mut self, channel: Arc<C>) -> ChannelId {
        let id = self.channels.len();
        self.channels.push(channel);
        id
    }
}

/// State shared between the pool handle and every outstanding lease
pub(crate) struct ChannelSet<C: Channel> {
    name: String,
    authority: String,
    factory: Arc<dyn Fn() -> C + Send + Sync>,
    state: Mutex<PoolState<C>>,
    pub(crate) metrics: MetricsTracker,
}

impl<C: Channel> ChannelSet<C> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Hand out an idle channel, or build a new one outside the lock
    fn lease(&self) -> (ChannelId, Arc<C>) {
        {
            let mut state = self.state.lock();
            if let Some(id) = state.idle.pop() {
                state.leased.insert(id);
                MetricsTracker::increment(&self.metrics.total_leased);
                debug!(pool = %self.name, channel = id, "Leased idle channel");
                return (id, Arc::clone(&state.channels[id]));
            }
        }

        let channel = Arc::new((self.factory)());
        MetricsTracker::increment(&self.metrics.channels_created);

        let (id, shutdown_started) = {
            let mut state = self.state.lock();
            let id = state.add(Arc::clone(&channel));
            state.leased.insert(id);
            (id, state.shutdown_started)
        };
        MetricsTracker::increment(&self.metrics.total_leased);
        debug!(pool = %self.name, channel = id, "Created channel for new lease");

        // Lost a race with shutdown: the caller still gets it, but it takes no new work
        if shutdown_started {
            channel.shutdown();
        }
        (id, channel)
    }

    fn add_idle(&self, channel: C) -> ChannelId {
        let channel = Arc::new(channel);
        MetricsTracker::increment(&self.metrics.channels_created);

        let (id, shutdown_started) = {
            let mut state = self.state.lock();
            let id = state.add(Arc::clone(&channel));
            state.idle.push(id);
            (id, state.shutdown_started)
        };

        if shutdown_started {
            channel.shutdown();
        }
        id
    }

    /// Move a leased channel back to the idle set.
    ///
    /// # Panics
    ///
    /// Panics if the channel is not currently leased.
    pub(crate) fn release(&self, id: ChannelId) {
        let mut state = self.state.lock();
        assert!(
            state.leased.remove(&id),
            "Channel {} released that was not leased",
            id
        );
        state.idle.push(id);
        MetricsTracker::increment(&self.metrics.total_released);
        debug!(pool = %self.name, channel = id, idle = state.idle.len(), "Released channel");
    }

    fn begin_shutdown(&self) -> Vec<Arc<C>> {
        let mut state = self.state.lock();
        state.shutdown_started = true;
        state.members()
    }

    fn members_if_shutdown(&self) -> Option<Vec<Arc<C>>> {
        let state = self.state.lock();
        if state.shutdown_started {
            Some(state.members())
        } else {
            None
        }
    }
}

/// A [`Channel`] that gives each in-flight call its own member channel
///
/// Members come from a factory that always targets the same endpoint. An
/// idle member is reused when one exists; otherwise the factory builds a
/// new one. Members are never dropped from the pool, only shut down.
///
/// # Examples
///
/// ```
/// use isolation_channel::{Channel, IsolationChannel, LoopbackChannel};
///
/// let pool = IsolationChannel::create(|| LoopbackChannel::new("windmill:443"));
/// assert_eq!(pool.authority(), "windmill:443");
/// assert_eq!(pool.channel_count(), 1);
///
/// pool.shutdown();
/// assert!(pool.is_shutdown());
/// ```
pub struct IsolationChannel<C: Channel> {
    set: Arc<ChannelSet<C>>,
    config: Arc<IsolationConfig>,
}

impl<C: Channel> Clone for IsolationChannel<C> {
    fn clone(&self) -> Self {
        Self {
            set: Arc::clone(&self.set),
            config: Arc::clone(&self.config),
        }
    }
}

impl<C: Channel> IsolationChannel<C> {
    /// Create a pool, invoking the factory once for the seed channel
    pub fn create<F>(factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self::with_config(factory, IsolationConfig::default())
    }

    /// Create a pool with explicit configuration
    pub fn with_config<F>(factory: F, config: IsolationConfig) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let seed = factory();
        let authority = seed.authority();

        let metrics = MetricsTracker::new();
        MetricsTracker::increment(&metrics.channels_created);

        let set = ChannelSet {
            name: config.name.clone(),
            authority,
            factory: Arc::new(factory),
            state: Mutex::new(PoolState {
                channels: vec![Arc::new(seed)],
                idle: vec![0],
                leased: BTreeSet::new(),
                shutdown_started: false,
            }),
            metrics,
        };

        let pool = Self {
            set: Arc::new(set),
            config: Arc::new(config),
        };

        if let Some(count) = pool.config.warmup_size {
            pool.warmup(count);
        }

        debug!(pool = %pool.set.name, authority = %pool.set.authority, "Isolation channel created");
        pool
    }

    /// Lease a member channel and create a call on it
    pub fn lease_call(&self, method: &MethodDescriptor, options: CallOptions) -> LeasedCall<C> {
        let (id, channel) = self.set.lease();
        let call = channel.new_call(method, options);
        LeasedCall::new(Arc::clone(&self.set), id, call)
    }

    /// Pre-create idle channels
    pub fn warmup(&self, count: usize) {
        for _ in 0..count {
            let id = self.set.add_idle((self.set.factory)());
            debug!(pool = %self.set.name, channel = id, "Warmed up channel");
        }
    }

    /// Warm up on the blocking thread pool
    pub async fn warmup_async(&self, count: usize) -> ChannelResult<()> {
        let pool = self.clone();
        let task = tokio::task::spawn_blocking(move || pool.warmup(count));

        match self.config.operation_timeout {
            Some(timeout) => tokio::time::timeout(timeout, task)
                .await
                .map_err(|_| ChannelError::Timeout(timeout))?
                .map_err(|_| ChannelError::Cancelled),
            None => task.await.map_err(|_| ChannelError::Cancelled),
        }
    }

    /// [`Channel::await_termination`] without blocking the async runtime
    pub async fn await_termination_async(&self, timeout: Duration) -> ChannelResult<bool> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.await_termination(timeout))
            .await
            .map_err(|_| ChannelError::Cancelled)
    }

    /// Shut down, wait out the grace period, then force shutdown if needed.
    /// Returns whether the pool terminated.
    pub fn shutdown_gracefully(&self) -> bool {
        self.shutdown();
        let grace = self.config.shutdown_grace_period;
        if self.await_termination(grace) {
            return true;
        }

        warn!(pool = %self.set.name, ?grace, "Channels did not terminate in time, forcing shutdown");
        self.shutdown_now();
        self.is_terminated()
    }

    pub fn idle_count(&self) -> usize {
        self.set.state.lock().idle.len()
    }

    pub fn leased_count(&self) -> usize {
        self.set.state.lock().leased.len()
    }

    /// Every channel the factory has produced for this pool
    pub fn channel_count(&self) -> usize {
        self.set.state.lock().channels.len()
    }

    pub fn is_shutdown_started(&self) -> bool {
        self.set.state.lock().shutdown_started
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let state = self.set.state.lock();
        HealthStatus::new(state.idle.len(), state.leased.len(), state.shutdown_started)
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (idle, leased) = {
            let state = self.set.state.lock();
            (state.idle.len(), state.leased.len())
        };
        self.set.metrics.get_metrics(idle, leased)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }
}

impl<C: Channel> Channel for IsolationChannel<C> {
    fn authority(&self) -> String {
        self.set.authority.clone()
    }

    fn new_call(&self, method: &MethodDescriptor, options: CallOptions) -> Box<dyn ClientCall> {
        Box::new(self.lease_call(method, options))
    }

    fn shutdown(&self) {
        let members = self.set.begin_shutdown();
        info!(pool = %self.set.name, channels = members.len(), "Shutting down isolation channel");
        for channel in members {
            channel.shutdown();
        }
    }

    fn shutdown_now(&self) {
        let members = self.set.begin_shutdown();
        info!(pool = %self.set.name, channels = members.len(), "Forcing isolation channel shutdown");
        for channel in members {
            channel.shutdown_now();
        }
    }

    fn is_shutdown(&self) -> bool {
        match self.set.members_if_shutdown() {
            Some(members) => members.iter().all(|channel| channel.is_shutdown()),
            None => false,
        }
    }

    fn is_terminated(&self) -> bool {
        match self.set.members_if_shutdown() {
            Some(members) => members.iter().all(|channel| channel.is_terminated()),
            None => false,
        }
    }

    /// Waits on each member in turn against one shared deadline. Early
    /// members may use the whole budget; later ones are then skipped.
    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        if self.is_terminated() {
            return true;
        }

        let Some(members) = self.set.members_if_shutdown() else {
            return false;
        };

        for channel in members {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                break;
            }
            channel.await_termination(remaining);
        }

        self.is_terminated()
    }
}
