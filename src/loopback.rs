//! In-process echo channel
//!
//! [`LoopbackChannel`] implements the full [`Channel`] contract without a
//! network: each message sent on a call is echoed back to that call's
//! listener, and half-closing completes the call with `OK`. It backs the demo
//! binary and the pool's concurrency tests.
//!
//! Response headers carry `grpc-encoding` set to the call's compressor, or
//! `identity` when none was requested. The transport is always ready, so
//! `wait_for_ready` never changes the outcome of a call.
//!
//! Listeners are never invoked while the channel's bookkeeping lock is held,
//! but a listener must not call back into its own call from `on_message`.

use crate::channel::{CallListener, CallOptions, Channel, ClientCall, Metadata, MethodDescriptor, Status};
use crate::errors::{ChannelError, ChannelResult};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct CallCore {
    listener: Mutex<Option<Box<dyn CallListener>>>,
}

impl CallCore {
    fn with_listener(&self, f: impl FnOnce(&mut Box<dyn CallListener>)) {
        let mut listener = self.listener.lock();
        if let Some(listener) = listener.as_mut() {
            f(listener);
        }
    }

    /// Close at most once; whoever takes the listener delivers on_close
    fn close(&self, status: Status) -> bool {
        let listener = self.listener.lock().take();
        match listener {
            Some(mut listener) => {
                listener.on_close(status, Metadata::new());
                true
            }
            None => false,
        }
    }

    fn is_open(&self) -> bool {
        self.listener.lock().is_some()
    }
}

#[derive(Default)]
struct LoopbackState {
    shutdown: bool,
    terminated: bool,
    next_call_id: u64,
    active: HashMap<u64, Arc<CallCore>>,
}

struct LoopbackInner {
    authority: String,
    state: Mutex<LoopbackState>,
    termination: Condvar,
}

impl LoopbackInner {
    fn complete(&self, call_id: u64) {
        let mut state = self.state.lock();
        state.active.remove(&call_id);
        if state.shutdown && state.active.is_empty() && !state.terminated {
            state.terminated = true;
            self.termination.notify_all();
            debug!(authority = %self.authority, "Loopback channel terminated");
        }
    }
}

/// An in-memory [`Channel`] that echoes messages back to the caller
///
/// # Examples
///
/// ```
/// use isolation_channel::{Channel, LoopbackChannel};
/// use std::time::Duration;
///
/// let channel = LoopbackChannel::new("localhost:8980");
/// assert_eq!(channel.authority(), "localhost:8980");
///
/// channel.shutdown();
/// assert!(channel.await_termination(Duration::from_millis(10)));
/// ```
#[derive(Clone)]
pub struct LoopbackChannel {
    inner: Arc<LoopbackInner>,
}

impl LoopbackChannel {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                authority: authority.into(),
                state: Mutex::new(LoopbackState::default()),
                termination: Condvar::new(),
            }),
        }
    }

    /// Calls started and not yet closed
    pub fn active_calls(&self) -> usize {
        self.inner.state.lock().active.len()
    }
}

impl Channel for LoopbackChannel {
    fn authority(&self) -> String {
        self.inner.authority.clone()
    }

    fn new_call(&self, method: &MethodDescriptor, options: CallOptions) -> Box<dyn ClientCall> {
        Box::new(LoopbackCall {
            channel: Arc::clone(&self.inner),
            method: method.clone(),
            options,
            call_id: None,
            core: None,
            cancelled: None,
            started: false,
        })
    }

    fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        if state.active.is_empty() && !state.terminated {
            state.terminated = true;
            self.inner.termination.notify_all();
        }
    }

    fn shutdown_now(&self) {
        let cores: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            state.active.drain().map(|(_, core)| core).collect()
        };

        for core in cores {
            core.close(Status::unavailable("Channel shutdownNow invoked"));
        }

        let mut state = self.inner.state.lock();
        if !state.terminated {
            state.terminated = true;
            self.inner.termination.notify_all();
        }
    }

    fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        while !state.terminated {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .termination
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.inner.termination.wait(&mut state),
            }
        }
        state.terminated
    }
}

struct LoopbackCall {
    channel: Arc<LoopbackInner>,
    method: MethodDescriptor,
    options: CallOptions,
    call_id: Option<u64>,
    core: Option<Arc<CallCore>>,
    cancelled: Option<Status>,
    started: bool,
}

impl LoopbackCall {
    fn response_headers(&self, request: &Metadata) -> Metadata {
        let encoding = self.options.compression.as_deref().unwrap_or("identity");
        debug!(
            method = %self.method.full_method_name,
            encoding,
            wait_for_ready = self.options.wait_for_ready,
            request_headers = request.len(),
            "Loopback call started"
        );
        let mut headers = Metadata::new();
        headers.insert("grpc-encoding", encoding);
        headers
    }

    fn finish(&mut self, status: Status) {
        if let Some(core) = &self.core {
            core.close(status);
        }
        if let Some(call_id) = self.call_id.take() {
            self.channel.complete(call_id);
        }
    }
}

impl ClientCall for LoopbackCall {
    fn start(&mut self, mut listener: Box<dyn CallListener>, headers: Metadata) -> ChannelResult<()> {
        if self.started {
            return Err(ChannelError::AlreadyStarted);
        }
        self.started = true;

        if let Some(status) = self.cancelled.take() {
            listener.on_close(status, Metadata::new());
            return Ok(());
        }
        if self.options.is_expired() {
            listener.on_close(
                Status::deadline_exceeded(format!(
                    "Deadline passed before {} started",
                    self.method.full_method_name
                )),
                Metadata::new(),
            );
            return Ok(());
        }

        let core = Arc::new(CallCore {
            listener: Mutex::new(Some(listener)),
        });

        let registered = {
            let mut state = self.channel.state.lock();
            if state.shutdown {
                None
            } else {
                let call_id = state.next_call_id;
                state.next_call_id += 1;
                state.active.insert(call_id, Arc::clone(&core));
                Some(call_id)
            }
        };

        match registered {
            Some(call_id) => {
                self.call_id = Some(call_id);
                let response = self.response_headers(&headers);
                core.with_listener(|listener| {
                    listener.on_headers(response);
                    listener.on_ready();
                });
                self.core = Some(core);
            }
            None => {
                core.close(Status::unavailable("Channel shutdown invoked"));
            }
        }
        Ok(())
    }

    // Messages are echoed as they arrive; there is no inbound flow control
    fn request(&mut self, _num_messages: usize) {}

    fn cancel(&mut self, message: Option<&str>, _cause: Option<ChannelError>) {
        let status = Status::cancelled(message.unwrap_or("Call cancelled"));
        if self.started {
            self.finish(status);
        } else {
            self.cancelled = Some(status);
        }
    }

    fn half_close(&mut self) {
        self.finish(Status::ok());
    }

    fn send_message(&mut self, message: Bytes) {
        match &self.core {
            Some(core) => core.with_listener(|listener| listener.on_message(message)),
            None => debug!(method = %self.method.full_method_name, "Dropping message for call that is not running"),
        }
    }

    fn is_ready(&self) -> bool {
        self.core.as_ref().map(|core| core.is_open()).unwrap_or(false)
    }
}
