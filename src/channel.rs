//! The single-channel contract
//!
//! [`Channel`] is what the isolation pool leases from its factory and also
//! what it exposes to callers, so a pool can stand in wherever one channel
//! would be used. Messages are opaque [`Bytes`] frames.

use crate::errors::{ChannelError, ChannelResult};

use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};

/// Canonical RPC status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

/// Terminal status of a call
///
/// # Examples
///
/// ```
/// use isolation_channel::{Code, Status};
///
/// let status = Status::unavailable("endpoint went away");
/// assert_eq!(status.code, Code::Unavailable);
/// assert!(!status.is_ok());
/// assert_eq!(status.to_string(), "UNAVAILABLE: endpoint went away");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub description: Option<String>,
}

impl Status {
    pub fn new(code: Code, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }

    pub fn ok() -> Self {
        Self {
            code: Code::Ok,
            description: None,
        }
    }

    pub fn cancelled(description: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, description)
    }

    pub fn unavailable(description: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, description)
    }

    pub fn deadline_exceeded(description: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(Code::Internal, description)
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code.as_str(), description),
            None => f.write_str(self.code.as_str()),
        }
    }
}

impl std::error::Error for Status {}

/// Ordered multimap used for call headers and trailers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value; keys are stored lowercase
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .push((key.into().to_ascii_lowercase(), value.into()));
    }

    /// Last value recorded for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

/// Identifies the remote method a call invokes
///
/// # Examples
///
/// ```
/// use isolation_channel::{MethodDescriptor, MethodType};
///
/// let method = MethodDescriptor::new("windmill.Service/GetConfig", MethodType::Unary);
/// assert_eq!(method.service_name(), Some("windmill.Service"));
/// assert_eq!(method.method_name(), "GetConfig");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub full_method_name: String,
    pub method_type: MethodType,
}

impl MethodDescriptor {
    pub fn new(full_method_name: impl Into<String>, method_type: MethodType) -> Self {
        Self {
            full_method_name: full_method_name.into(),
            method_type,
        }
    }

    pub fn service_name(&self) -> Option<&str> {
        self.full_method_name
            .rsplit_once('/')
            .map(|(service, _)| service)
    }

    pub fn method_name(&self) -> &str {
        match self.full_method_name.rsplit_once('/') {
            Some((_, method)) => method,
            None => &self.full_method_name,
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Absolute deadline after which the call fails with `DEADLINE_EXCEEDED`
    pub deadline: Option<Instant>,

    /// Whether to wait for the transport to become ready instead of failing fast
    pub wait_for_ready: bool,

    /// Compressor name, if any
    pub compression: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now; a timeout past the clock's range means no deadline
    pub fn with_deadline_after(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn with_wait_for_ready(mut self) -> Self {
        self.wait_for_ready = true;
        self
    }

    pub fn with_compression(mut self, compressor: impl Into<String>) -> Self {
        self.compression = Some(compressor.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// Receives the events of one call
///
/// `on_close` is the terminal notification and is expected exactly once.
pub trait CallListener: Send {
    fn on_headers(&mut self, _headers: Metadata) {}

    fn on_message(&mut self, _message: Bytes) {}

    fn on_ready(&mut self) {}

    fn on_close(&mut self, status: Status, trailers: Metadata);
}

/// One RPC invocation issued over a channel
pub trait ClientCall: Send {
    /// Start the call, delivering all further events to `listener`
    fn start(&mut self, listener: Box<dyn CallListener>, headers: Metadata) -> ChannelResult<()>;

    /// Ask for up to `num_messages` more inbound messages
    fn request(&mut self, num_messages: usize);

    /// Cancel the call; the listener still receives a terminal `on_close`
    fn cancel(&mut self, message: Option<&str>, cause: Option<ChannelError>);

    fn half_close(&mut self);

    fn send_message(&mut self, message: Bytes);

    fn is_ready(&self) -> bool {
        true
    }

    fn set_message_compression(&mut self, _enabled: bool) {}
}

/// A reusable handle to one remote endpoint
pub trait Channel: Send + Sync + 'static {
    /// Identity of the endpoint, e.g. `host:port`
    fn authority(&self) -> String;

    fn new_call(&self, method: &MethodDescriptor, options: CallOptions) -> Box<dyn ClientCall>;

    /// Stop accepting new calls; in-flight calls continue
    fn shutdown(&self);

    /// Stop accepting new calls and cancel in-flight ones
    fn shutdown_now(&self);

    fn is_shutdown(&self) -> bool;

    fn is_terminated(&self) -> bool;

    /// Block up to `timeout` for termination, returning whether it happened
    fn await_termination(&self, timeout: Duration) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_multimap() {
        let mut metadata = Metadata::new();
        metadata.insert("X-Trace", "a");
        metadata.insert("x-trace", "b");
        metadata.insert("user-agent", "pool");

        assert_eq!(metadata.get("x-trace"), Some("b"));
        assert_eq!(metadata.get_all("X-TRACE"), vec!["a", "b"]);
        assert_eq!(metadata.len(), 3);
        assert!(metadata.get("missing").is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::ok().to_string(), "OK");
        assert_eq!(
            Status::cancelled("user gave up").to_string(),
            "CANCELLED: user gave up"
        );
    }

    #[test]
    fn test_method_name_without_service() {
        let method = MethodDescriptor::new("Ping", MethodType::Unary);
        assert_eq!(method.service_name(), None);
        assert_eq!(method.method_name(), "Ping");
    }

    #[test]
    fn test_call_options_deadline() {
        let options = CallOptions::new().with_deadline_after(Duration::from_secs(60));
        assert!(!options.is_expired());

        let expired = CallOptions::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(expired.is_expired());

        assert!(!CallOptions::new().is_expired());
    }

    #[test]
    fn test_deadline_after_overflow_leaves_no_deadline() {
        let options = CallOptions::new().with_deadline_after(Duration::MAX);
        assert!(options.deadline.is_none());
        assert!(!options.is_expired());
    }
}
