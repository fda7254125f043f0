use criterion::{criterion_group, criterion_main, Criterion};
use isolation_channel::{
    CallListener, CallOptions, ClientCall, IsolationChannel, LoopbackChannel, Metadata,
    MethodDescriptor, MethodType, Status,
};
use std::hint::black_box;

struct Discard;

impl CallListener for Discard {
    fn on_close(&mut self, _status: Status, _trailers: Metadata) {}
}

fn lease_release(c: &mut Criterion) {
    let pool = IsolationChannel::create(|| LoopbackChannel::new("bench:0"));
    let method = MethodDescriptor::new("bench.Echo/Say", MethodType::Unary);

    c.bench_function("lease_start_close", |b| {
        b.iter(|| {
            let mut call = pool.lease_call(black_box(&method), CallOptions::new());
            call.start(Box::new(Discard), Metadata::new()).unwrap();
            call.half_close();
        })
    });

    c.bench_function("lease_drop_unstarted", |b| {
        b.iter(|| {
            let call = pool.lease_call(black_box(&method), CallOptions::new());
            drop(call);
        })
    });
}

criterion_group!(benches, lease_release);
criterion_main!(benches);
