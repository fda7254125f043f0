// Isolation Channel
// Every in-flight RPC gets its own channel to the endpoint
// Version 1.0.0

// This is just a binary wrapper - the actual library is in lib.rs
// Run the demo with: cargo run --example concurrent_calls

use isolation_channel::{
    CallListener, CallOptions, Channel, ClientCall, IsolationChannel, LoopbackChannel, Metadata,
    MethodDescriptor, MethodType, Status,
};
use tracing_subscriber::EnvFilter;

struct LogListener;

impl CallListener for LogListener {
    fn on_close(&mut self, status: Status, _trailers: Metadata) {
        println!("  Call closed: {}", status);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Isolation Channel v1.0.0 ===");
    println!("Run: cargo run --example concurrent_calls");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let pool = IsolationChannel::create(|| LoopbackChannel::new("localhost:443"));
    let method = MethodDescriptor::new("demo.Echo/Say", MethodType::Unary);

    let mut first = pool.lease_call(&method, CallOptions::new());
    let mut second = pool.lease_call(&method, CallOptions::new());
    for call in [&mut first, &mut second] {
        if let Err(e) = call.start(Box::new(LogListener), Metadata::new()) {
            eprintln!("  Failed to start call: {}", e);
            return;
        }
    }
    println!("  Channels while two calls run: {}", pool.channel_count());

    first.half_close();
    second.half_close();
    println!("  Idle after both closed: {}", pool.idle_count());

    println!("  Terminated after graceful close: {}", pool.shutdown_gracefully());
    println!("  Shut down: {}", pool.is_shutdown());
}
