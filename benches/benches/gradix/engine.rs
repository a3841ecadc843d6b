use ::benches::{context, mlp_loss, SIZES};
use criterion::{black_box, criterion_group, Criterion};
use gradix_tensor::{grad, AccumulationOrder, GradOptions};

pub fn grad_orders(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("engine/grad");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    for order in [AccumulationOrder::Insertion, AccumulationOrder::Sorted] {
        for &(n, size_name) in &SIZES {
            let bench_name = format!("{}/{}/{}x{}", order.as_str(), size_name, n, n);
            group.bench_function(&bench_name, |b| {
                b.iter(|| {
                    let ctx = context(order);
                    let (loss, params) = mlp_loss(&ctx, n).unwrap();
                    let refs: Vec<_> = params.iter().collect();
                    black_box(grad(&[&loss], &refs, GradOptions::default()).unwrap())
                })
            });
        }
    }

    group.finish();
}

pub fn backward(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("engine/backward");
    group.warm_up_time(core::time::Duration::from_millis(500));
    group.measurement_time(core::time::Duration::from_secs(3));
    group.sample_size(50);

    for &(n, size_name) in &SIZES {
        let bench_name = format!("{}/{}x{}", size_name, n, n);
        group.bench_function(&bench_name, |b| {
            b.iter(|| {
                let ctx = context(AccumulationOrder::Insertion);
                let (loss, params) = mlp_loss(&ctx, n).unwrap();
                loss.backward().unwrap();
                black_box(params[0].grad().unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, grad_orders, backward);
