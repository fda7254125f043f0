//! Scripted channels and listeners shared by the unit tests

use crate::channel::{CallListener, CallOptions, Channel, ClientCall, Metadata, MethodDescriptor, Status};
use crate::errors::{ChannelError, ChannelResult};
use crate::pool::IsolationChannel;

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Event {
    Headers(Metadata),
    Message(Bytes),
    Ready,
    Close(Status),
}

pub(crate) struct RecordingListener {
    events: Sender<Event>,
    panic_on_close: bool,
}

impl RecordingListener {
    pub fn new() -> (Self, Receiver<Event>) {
        let (tx, rx) = unbounded();
        (
            Self {
                events: tx,
                panic_on_close: false,
            },
            rx,
        )
    }

    pub fn panicking() -> Self {
        let (tx, _) = unbounded();
        Self {
            events: tx,
            panic_on_close: true,
        }
    }
}

impl CallListener for RecordingListener {
    fn on_headers(&mut self, headers: Metadata) {
        let _ = self.events.send(Event::Headers(headers));
    }

    fn on_message(&mut self, message: Bytes) {
        let _ = self.events.send(Event::Message(message));
    }

    fn on_ready(&mut self) {
        let _ = self.events.send(Event::Ready);
    }

    fn on_close(&mut self, status: Status, _trailers: Metadata) {
        if self.panic_on_close {
            panic!("listener failed in on_close");
        }
        let _ = self.events.send(Event::Close(status));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartBehavior {
    Succeed,
    Fail,
    /// Deliver on_close from inside start, then fail
    CloseThenFail,
}

/// Lets a test drive the listener of a fake call
#[derive(Default)]
pub(crate) struct FakeCallHandle {
    listener: Mutex<Option<Box<dyn CallListener>>>,
    started: AtomicBool,
    cancel_message: Mutex<Option<String>>,
}

impl FakeCallHandle {
    /// Deliver on_close; repeated calls deliver repeatedly
    pub fn close(&self, status: Status) {
        let mut listener = self.listener.lock();
        if let Some(listener) = listener.as_mut() {
            listener.on_close(status, Metadata::new());
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancel_message(&self) -> Option<String> {
        self.cancel_message.lock().clone()
    }
}

struct FakeCall {
    handle: Arc<FakeCallHandle>,
    start: StartBehavior,
}

impl ClientCall for FakeCall {
    fn start(&mut self, listener: Box<dyn CallListener>, _headers: Metadata) -> ChannelResult<()> {
        match self.start {
            StartBehavior::Fail => Err(ChannelError::Rpc(Status::unavailable("connection refused"))),
            StartBehavior::Succeed => {
                *self.handle.listener.lock() = Some(listener);
                self.handle.started.store(true, Ordering::SeqCst);
                Ok(())
            }
            StartBehavior::CloseThenFail => {
                *self.handle.listener.lock() = Some(listener);
                self.handle.close(Status::unavailable("transport closed"));
                Err(ChannelError::Rpc(Status::unavailable("connection reset")))
            }
        }
    }

    fn request(&mut self, _num_messages: usize) {}

    fn cancel(&mut self, message: Option<&str>, _cause: Option<ChannelError>) {
        let message = message.unwrap_or("Call cancelled").to_string();
        *self.handle.cancel_message.lock() = Some(message.clone());
        if self.handle.is_started() {
            self.handle.close(Status::cancelled(message));
        }
    }

    fn half_close(&mut self) {}

    fn send_message(&mut self, _message: Bytes) {}
}

struct FakeChannelState {
    authority: String,
    start: Mutex<StartBehavior>,
    shutdown: AtomicBool,
    terminated: AtomicBool,
    terminate_on_shutdown: AtomicBool,
    defer_shutdown: AtomicBool,
    hang_in_await: AtomicBool,
    shutdown_calls: AtomicUsize,
    shutdown_now_calls: AtomicUsize,
    awaited: Mutex<Vec<Duration>>,
    calls: Mutex<Vec<Arc<FakeCallHandle>>>,
}

/// Channel whose lifecycle answers are set by the test
#[derive(Clone)]
pub(crate) struct FakeChannel {
    state: Arc<FakeChannelState>,
}

impl FakeChannel {
    fn new(authority: &str) -> Self {
        Self {
            state: Arc::new(FakeChannelState {
                authority: authority.to_string(),
                start: Mutex::new(StartBehavior::Succeed),
                shutdown: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                terminate_on_shutdown: AtomicBool::new(true),
                defer_shutdown: AtomicBool::new(false),
                hang_in_await: AtomicBool::new(false),
                shutdown_calls: AtomicUsize::new(0),
                shutdown_now_calls: AtomicUsize::new(0),
                awaited: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_start(&self, behavior: StartBehavior) {
        *self.state.start.lock() = behavior;
    }

    pub fn set_terminate_on_shutdown(&self, value: bool) {
        self.state.terminate_on_shutdown.store(value, Ordering::SeqCst);
    }

    /// Keep reporting not-shut-down until [`FakeChannel::mark_shutdown`]
    pub fn set_defer_shutdown(&self, value: bool) {
        self.state.defer_shutdown.store(value, Ordering::SeqCst);
    }

    /// Sleep for the whole timeout in await_termination
    pub fn set_hang_in_await(&self, value: bool) {
        self.state.hang_in_await.store(value, Ordering::SeqCst);
    }

    pub fn mark_shutdown(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_now_calls(&self) -> usize {
        self.state.shutdown_now_calls.load(Ordering::SeqCst)
    }

    pub fn awaited(&self) -> Vec<Duration> {
        self.state.awaited.lock().clone()
    }

    pub fn last_call(&self) -> Arc<FakeCallHandle> {
        let calls = self.state.calls.lock();
        Arc::clone(calls.last().expect("no call was created on this channel"))
    }
}

impl Channel for FakeChannel {
    fn authority(&self) -> String {
        self.state.authority.clone()
    }

    fn new_call(&self, _method: &MethodDescriptor, _options: CallOptions) -> Box<dyn ClientCall> {
        let handle = Arc::new(FakeCallHandle::default());
        self.state.calls.lock().push(Arc::clone(&handle));
        Box::new(FakeCall {
            handle,
            start: *self.state.start.lock(),
        })
    }

    fn shutdown(&self) {
        self.state.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.defer_shutdown.load(Ordering::SeqCst) {
            self.state.shutdown.store(true, Ordering::SeqCst);
        }
        if self.state.terminate_on_shutdown.load(Ordering::SeqCst) {
            self.state.terminated.store(true, Ordering::SeqCst);
        }
    }

    fn shutdown_now(&self) {
        self.state.shutdown_now_calls.fetch_add(1, Ordering::SeqCst);
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.state.terminated.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }

    fn is_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::SeqCst)
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.state.awaited.lock().push(timeout);
        if self.state.hang_in_await.load(Ordering::SeqCst) {
            std::thread::sleep(timeout);
        }
        self.is_terminated()
    }
}

/// Builds [`FakeChannel`]s and keeps a handle to each one
#[derive(Clone)]
pub(crate) struct FakeFactory {
    authority: String,
    created: Arc<Mutex<Vec<FakeChannel>>>,
}

impl FakeFactory {
    pub fn new(authority: &str) -> Self {
        Self {
            authority: authority.to_string(),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn make(&self) -> FakeChannel {
        let channel = FakeChannel::new(&self.authority);
        self.created.lock().push(channel.clone());
        channel
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn channel(&self, index: usize) -> FakeChannel {
        self.created.lock()[index].clone()
    }
}

pub(crate) fn pool_with(factory: &FakeFactory) -> IsolationChannel<FakeChannel> {
    let factory = factory.clone();
    IsolationChannel::create(move || factory.make())
}
