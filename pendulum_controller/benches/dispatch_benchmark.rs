//! Dispatch benchmark: submit-to-dispatch throughput of the bounded executor
//! and per-update bookkeeping cost of the controller loop.
//!
//! The executor runs on its own thread for the whole group; each iteration
//! pushes a burst through a blocking submitter and waits until the dispatch
//! counter has caught up.

use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use parking_lot::Mutex;

use pendulum_common::data::{JointState, Message};
use pendulum_controller::controller::{DEFAULT_FEEDBACK_MATRIX, PendulumController};
use pendulum_controller::executor::{
    BackpressurePolicy, BoundedExecutor, ExecutorConfig, ExecutorFault, ExecutorVariant,
    Schedulable,
};
use pendulum_controller::stats::LatencyStats;

/// Component that only counts what it receives.
#[derive(Default)]
struct Sink {
    received: u64,
}

impl Schedulable for Sink {
    fn on_message(&mut self, msg: Message) -> Result<(), ExecutorFault> {
        black_box(msg);
        self.received += 1;
        Ok(())
    }
}

fn sample_state(i: u64) -> Message {
    Message::JointState(JointState {
        cart_position: 0.001 * i as f64,
        pole_angle: std::f64::consts::PI,
        ..Default::default()
    })
}

fn bench_submit_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_dispatch");

    for &capacity in &[16usize, 256, 4096] {
        let exec = Arc::new(
            BoundedExecutor::create(ExecutorConfig {
                capacity,
                variant: ExecutorVariant::Static,
                backpressure: BackpressurePolicy::Block { timeout: None },
            })
            .expect("executor"),
        );
        let id = exec
            .attach("sink", Arc::new(Mutex::new(Sink::default())))
            .expect("attach");
        let runner = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || exec.run())
        };
        let tx = exec.submitter();

        const BURST: u64 = 1024;
        group.throughput(Throughput::Elements(BURST));
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &capacity, |b, _| {
            b.iter(|| {
                let target = exec.stats().messages_dispatched + BURST;
                for i in 0..BURST {
                    tx.submit(id, sample_state(i)).expect("submit");
                }
                while exec.stats().messages_dispatched < target {
                    thread::yield_now();
                }
            });
        });

        exec.stop();
        runner.join().expect("runner").expect("run");
        exec.destroy_all().expect("destroy");
    }

    group.finish();
}

fn bench_update_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_loop");
    group.sample_size(500);

    let mut controller = PendulumController::new(DEFAULT_FEEDBACK_MATRIX);
    controller.set_state(JointState {
        cart_position: 0.1,
        cart_velocity: 0.0,
        pole_angle: std::f64::consts::PI + 0.05,
        pole_velocity: -0.02,
        ..Default::default()
    });
    group.bench_function("law_update", |b| {
        b.iter(|| black_box(controller.update()));
    });

    let mut stats = LatencyStats::default();
    let deadline = Duration::from_micros(2000).as_nanos() as i64;
    let mut n = 0i64;
    group.bench_function("latency_record", |b| {
        b.iter(|| {
            n = (n + 7_919) % 1_000_000;
            stats.record(black_box(n), deadline, 0);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_submit_dispatch, bench_update_loop);
criterion_main!(benches);
