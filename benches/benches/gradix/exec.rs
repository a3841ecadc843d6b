use ::benches::{mlp_program, SIZES};
use criterion::{black_box, criterion_group, Criterion};
use gradix_exec::{CompileStrategy, CompiledExecutor, Executor, Precision, ReferenceExecutor};

pub fn executors(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("exec/run");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    let executors: Vec<(&str, Box<dyn Executor>)> = vec![
        ("reference", Box::new(ReferenceExecutor::new())),
        ("compiled_f32", Box::new(CompiledExecutor::default())),
        (
            "compiled_f16",
            Box::new(CompiledExecutor::new(CompileStrategy::default().with_precision(Precision::F16)).unwrap()),
        ),
        (
            "compiled_unfused",
            Box::new(CompiledExecutor::new(CompileStrategy::default().with_fuse_elementwise(false)).unwrap()),
        ),
    ];

    for &(n, size_name) in &SIZES {
        let (program, feeds) = mlp_program(n).unwrap();
        for (name, executor) in &executors {
            let bench_name = format!("{}/{}/{}x{}", name, size_name, n, n);
            group.bench_function(&bench_name, |b| b.iter(|| black_box(executor.run(&program, &feeds).unwrap())));
        }
    }

    group.finish();
}

pub fn compile(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("exec/compile");
    group.sample_size(50);

    for &(n, size_name) in &SIZES {
        let (program, _) = mlp_program(n).unwrap();
        group.bench_function(size_name, |b| {
            b.iter(|| {
                let executor = CompiledExecutor::default();
                black_box(executor.compile(&program).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, executors, compile);
