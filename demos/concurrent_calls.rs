//! Concurrent calls over an isolation channel

use bytes::Bytes;
use isolation_channel::{
    CallListener, CallOptions, Channel, ClientCall, IsolationChannel, IsolationConfig,
    LoopbackChannel, Metadata, MethodDescriptor, MethodType, Status,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct CountingListener {
    worker: usize,
    messages: usize,
}

impl CallListener for CountingListener {
    fn on_message(&mut self, _message: Bytes) {
        self.messages += 1;
    }

    fn on_close(&mut self, status: Status, _trailers: Metadata) {
        println!(
            "   worker {} closed with {} after {} echoes",
            self.worker, status, self.messages
        );
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("=== Isolation Channel - Concurrent Calls ===\n");

    // Example 1: Overlapping calls each get a channel
    overlapping_calls();

    // Example 2: Sequential calls reuse one channel
    sequential_calls();

    // Example 3: Shutdown with calls in flight
    shutdown_in_flight();
}

fn overlapping_calls() {
    println!("1. Overlapping Calls:");
    const WORKERS: usize = 4;

    let config = IsolationConfig::new().with_name("demo");
    let pool = IsolationChannel::with_config(|| LoopbackChannel::new("localhost:443"), config);
    let method = MethodDescriptor::new("demo.Echo/Stream", MethodType::BidiStreaming);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let pool = pool.clone();
            let method = method.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut call = pool.lease_call(&method, CallOptions::new());
                let listener = CountingListener { worker, messages: 0 };
                if let Err(e) = call.start(Box::new(listener), Metadata::new()) {
                    eprintln!("   worker {} failed to start: {}", worker, e);
                    return;
                }
                barrier.wait();
                for _ in 0..3 {
                    call.send_message(Bytes::from_static(b"ping"));
                }
                call.half_close();
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    println!("   Channels created: {}", pool.channel_count());
    println!("   Idle channels: {}\n", pool.idle_count());
}

fn sequential_calls() {
    println!("2. Sequential Calls:");
    let pool = IsolationChannel::create(|| LoopbackChannel::new("localhost:443"));
    let method = MethodDescriptor::new("demo.Echo/Say", MethodType::Unary);

    for worker in 0..3 {
        let mut call = pool.lease_call(&method, CallOptions::new());
        let listener = CountingListener { worker, messages: 0 };
        if call.start(Box::new(listener), Metadata::new()).is_ok() {
            call.send_message(Bytes::from_static(b"hello"));
            call.half_close();
        }
    }

    println!("   Channels created: {}", pool.channel_count());
    for (key, value) in pool.export_metrics() {
        println!("   {}: {}", key, value);
    }
    println!();
}

fn shutdown_in_flight() {
    println!("3. Shutdown In Flight:");
    let config = IsolationConfig::new().with_shutdown_grace_period(Duration::from_millis(50));
    let pool = IsolationChannel::with_config(|| LoopbackChannel::new("localhost:443"), config);
    let method = MethodDescriptor::new("demo.Echo/Stream", MethodType::BidiStreaming);

    let mut call = pool.lease_call(&method, CallOptions::new());
    let listener = CountingListener { worker: 0, messages: 0 };
    if call.start(Box::new(listener), Metadata::new()).is_err() {
        return;
    }

    // The call never half-closes, so the grace period runs out
    let terminated = pool.shutdown_gracefully();
    println!("   Terminated: {}", terminated);
    println!("   Shut down: {}", pool.is_shutdown());

    let health = pool.get_health_status();
    println!("   Healthy: {} ({:?})", health.is_healthy(), health.warnings);
}
