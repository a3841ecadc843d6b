mod engine;
mod exec;

use criterion::criterion_main;

criterion_main!(engine::benches, exec::benches);
