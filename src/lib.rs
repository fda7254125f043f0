//! # Isolation Channel
//!
//! An RPC channel that gives every in-flight call its own dedicated
//! underlying channel to a single endpoint, so calls never share a
//! connection's flow control or queue behind each other.
//!
//! ## Features
//!
//! - Drop-in [`Channel`]: the pool exposes the same contract as one channel
//! - Idle channels are reused before the pool grows
//! - Each leased channel is returned exactly once, however its call ends
//! - Shutdown and termination fan out over every channel ever created
//! - Health monitoring and metrics with Prometheus export
//! - Pool warm-up/pre-population
//! - In-process [`LoopbackChannel`] for demos and tests
//!
//! ## Quick Start
//!
//! ```rust
//! use isolation_channel::{
//!     CallListener, CallOptions, Channel, ClientCall, IsolationChannel, LoopbackChannel, Metadata,
//!     MethodDescriptor, MethodType, Status,
//! };
//!
//! struct Print;
//!
//! impl CallListener for Print {
//!     fn on_close(&mut self, status: Status, _trailers: Metadata) {
//!         println!("closed with {}", status);
//!     }
//! }
//!
//! let pool = IsolationChannel::create(|| LoopbackChannel::new("localhost:443"));
//! let method = MethodDescriptor::new("echo.Echo/Say", MethodType::Unary);
//!
//! let mut call = pool.new_call(&method, CallOptions::new());
//! call.start(Box::new(Print), Metadata::new()).unwrap();
//! assert_eq!(pool.leased_count(), 1);
//!
//! call.half_close();
//! assert_eq!(pool.idle_count(), 1);
//! ```

mod channel;
mod config;
mod errors;
mod health;
mod lease;
mod loopback;
mod metrics;
mod pool;

#[cfg(test)]
mod test_support;

pub use channel::{
    CallListener, CallOptions, Channel, ClientCall, Code, Metadata, MethodDescriptor, MethodType,
    Status,
};
pub use config::IsolationConfig;
pub use errors::{ChannelError, ChannelResult};
pub use health::HealthStatus;
pub use lease::LeasedCall;
pub use loopback::LoopbackChannel;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::IsolationChannel;
