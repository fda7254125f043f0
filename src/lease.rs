//! Leased calls: return the backing channel to the pool exactly once

use crate::channel::{CallListener, Channel, ClientCall, Metadata, Status};
use crate::errors::{ChannelError, ChannelResult};
use crate::metrics::MetricsTracker;
use crate::pool::{ChannelId, ChannelSet};

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// One-shot flag; exactly one caller wins [`Latch::claim`]
#[derive(Debug, Default)]
pub(crate) struct Latch(AtomicBool);

impl Latch {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Returns true only for the caller that flipped the flag
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Lease<C: Channel> {
    set: Arc<ChannelSet<C>>,
    channel_id: ChannelId,
    closed: Latch,
    released: Latch,
}

impl<C: Channel> Lease<C> {
    /// Release the channel unless some other path already did
    fn release_once(&self) -> bool {
        if self.released.claim() {
            self.set.release(self.channel_id);
            true
        } else {
            MetricsTracker::increment(&self.set.metrics.duplicate_releases);
            false
        }
    }
}

/// Releases on drop so a panicking caller listener cannot leak the channel
struct ReleaseOnClose<'a, C: Channel>(&'a Lease<C>);

impl<C: Channel> Drop for ReleaseOnClose<'_, C> {
    fn drop(&mut self) {
        if !self.0.release_once() {
            warn!(
                pool = %self.0.set.name(),
                channel = self.0.channel_id,
                "Channel was released before the call closed. This may be due to an error on start of the call."
            );
        }
    }
}

/// Sits between the underlying call and the caller's listener
struct ReleasingListener<C: Channel> {
    inner: Box<dyn CallListener>,
    lease: Arc<Lease<C>>,
}

impl<C: Channel> CallListener for ReleasingListener<C> {
    fn on_headers(&mut self, headers: Metadata) {
        self.inner.on_headers(headers);
    }

    fn on_message(&mut self, message: Bytes) {
        self.inner.on_message(message);
    }

    fn on_ready(&mut self) {
        self.inner.on_ready();
    }

    fn on_close(&mut self, status: Status, trailers: Metadata) {
        if !self.lease.closed.claim() {
            MetricsTracker::increment(&self.lease.set.metrics.duplicate_closes);
            warn!(
                pool = %self.lease.set.name(),
                channel = self.lease.channel_id,
                %status,
                "Call is being closed more than once. Make sure on_close is not being invoked manually."
            );
            return;
        }

        let _release = ReleaseOnClose(&*self.lease);
        self.inner.on_close(status, trailers);
    }
}

/// A call bound to one leased channel of an [`IsolationChannel`](crate::IsolationChannel)
///
/// Drives exactly like the underlying call. The channel goes back to the
/// idle set when the call closes, when `start` fails, or when the call is
/// dropped without ever having been started.
pub struct LeasedCall<C: Channel> {
    delegate: Box<dyn ClientCall>,
    lease: Arc<Lease<C>>,
    cancellation: Option<String>,
    start_attempted: bool,
    started: bool,
}

impl<C: Channel> LeasedCall<C> {
    pub(crate) fn new(set: Arc<ChannelSet<C>>, channel_id: ChannelId, delegate: Box<dyn ClientCall>) -> Self {
        Self {
            delegate,
            lease: Arc::new(Lease {
                set,
                channel_id,
                closed: Latch::new(),
                released: Latch::new(),
            }),
            cancellation: None,
            start_attempted: false,
            started: false,
        }
    }

    /// Index of the pooled channel backing this call
    pub fn channel_id(&self) -> usize {
        self.lease.channel_id
    }

    /// Whether the backing channel has gone back to the pool
    pub fn is_released(&self) -> bool {
        self.lease.released.is_set()
    }
}

impl<C: Channel> ClientCall for LeasedCall<C> {
    fn start(&mut self, listener: Box<dyn CallListener>, headers: Metadata) -> ChannelResult<()> {
        if let Some(message) = &self.cancellation {
            return Err(ChannelError::AlreadyCancelled {
                message: message.clone(),
            });
        }
        if self.start_attempted {
            return Err(ChannelError::AlreadyStarted);
        }
        self.start_attempted = true;

        let listener = Box::new(ReleasingListener {
            inner: listener,
            lease: Arc::clone(&self.lease),
        });

        match self.delegate.start(listener, headers) {
            Ok(()) => {
                self.started = true;
                Ok(())
            }
            Err(e) => {
                MetricsTracker::increment(&self.lease.set.metrics.start_failures);
                if !self.lease.release_once() {
                    warn!(
                        pool = %self.lease.set.name(),
                        channel = self.lease.channel_id,
                        error = %e,
                        "Channel is already released. on_close was called before start failed."
                    );
                }
                Err(e)
            }
        }
    }

    fn request(&mut self, num_messages: usize) {
        self.delegate.request(num_messages);
    }

    fn cancel(&mut self, message: Option<&str>, cause: Option<ChannelError>) {
        let mut recorded = message.unwrap_or("Call cancelled").to_string();
        if let Some(cause) = &cause {
            recorded = format!("{} ({})", recorded, cause);
        }
        self.cancellation = Some(recorded);
        self.delegate.cancel(message, cause);
    }

    fn half_close(&mut self) {
        self.delegate.half_close();
    }

    fn send_message(&mut self, message: Bytes) {
        self.delegate.send_message(message);
    }

    fn is_ready(&self) -> bool {
        self.delegate.is_ready()
    }

    fn set_message_compression(&mut self, enabled: bool) {
        self.delegate.set_message_compression(enabled);
    }
}

impl<C: Channel> Drop for LeasedCall<C> {
    fn drop(&mut self) {
        // A started call is released by its on_close
        if !self.started && self.lease.released.claim() {
            self.lease.set.release(self.lease.channel_id);
        }
    }
}
