mod utils;

use gradix_core::error::{Error, Result};
use gradix_tensor::{grad, grad_fn, AccumulationOrder, GradOptions, GradRequest, Gradient};
use utils::{assert_close, setup_context, setup_param, setup_uniform_param};

test_orders!([
    self_and_offset,
    multiple_consumers,
    no_grad_vars,
    create_graph_accumulation,
    leaky_relu_double_grad,
    leaky_relu_second_derivative,
    matmul,
    stop_gradient_target,
    contributions_without_value,
    detached_first_grad,
    shared_input_grad_matches_backward,
    mixed_initial_gradients
]);

fn relu(v: f32) -> f32 {
    v.max(0.0)
}

fn step(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else {
        0.0
    }
}

mod test_functions {
    use super::*;

    pub fn self_and_offset_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);

        for create_graph in [false, true] {
            let x = setup_uniform_param(&ctx, &[5, 10], 11)?;
            let y = x.add_scalar(1.0)?;

            let dx = grad(&[&x], &[&x], GradOptions::default().create_graph(create_graph))?;
            let dx = dx[0].tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;
            assert_eq!(dx.shape(), &[5, 10]);
            assert_eq!(dx.to_vec_f32(), vec![1.0; 50]);
            assert_eq!(dx.stop_gradient(), !create_graph);

            let dx = grad(&[&y, &x], &[&x], GradOptions::default().retain_graph(true))?;
            assert_eq!(dx[0].tensor().map(|t| t.to_vec_f32()), Some(vec![2.0; 50]));

            let dy = grad(&[&x], &[&y], GradOptions::default().allow_unused(true))?;
            assert!(dy[0].is_no_gradient());

            let dy = grad(&[&x, &y], &[&y], GradOptions::default())?;
            assert_eq!(dy[0].tensor().map(|t| t.to_vec_f32()), Some(vec![1.0; 50]));
        }

        Ok(())
    }

    pub fn multiple_consumers_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = setup_param(&ctx, vec![-1.0, 0.5, 2.0, -3.0], &[4])?;
        let unused = setup_param(&ctx, vec![1.0; 4], &[4])?;

        let a = x.relu()?;
        let b = x.scale(3.0)?;
        let out = a.add(&b)?.sum()?;

        let err = grad(&[&out], &[&x, &a, &unused], GradOptions::default().retain_graph(true)).unwrap_err();
        assert!(matches!(err, Error::UnusedInput { index: 2, .. }));
        assert!(err.to_string().contains("allow_unused"));

        let grads = grad(&[&out], &[&x, &a, &unused], GradOptions::default().allow_unused(true))?;
        assert_eq!(grads.len(), 3);
        assert_eq!(grads[0].tensor().map(|t| t.to_vec_f32()), Some(vec![3.0, 4.0, 4.0, 3.0]));
        assert_eq!(grads[1].tensor().map(|t| t.to_vec_f32()), Some(vec![1.0; 4]));
        assert!(grads[2].is_no_gradient());
        assert!(x.grad()?.is_none());

        Ok(())
    }

    pub fn no_grad_vars_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = setup_uniform_param(&ctx, &[5, 10], 3)?;
        let n = x.size() as f32;

        let y1 = x.relu()?;
        let y2 = x.relu()?;
        let z = y1.add(&y2)?;
        let w = z.mul(&z)?;
        let w_mean = w.mean()?;

        let dx = grad(
            &[&w_mean],
            &[&x],
            GradOptions::default().create_graph(true).no_grad_vars(vec![y2.clone()]),
        )?;
        let dx = dx[0].clone().into_tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;
        assert!(!y2.stop_gradient());
        assert!(!dx.stop_gradient());

        let xs = x.to_vec_f32();
        let expected: Vec<f32> = xs
            .iter()
            .map(|&v| 1.0 / n * (relu(v) + relu(v)) * step(v) * 2.0)
            .collect();
        assert_close(&dx.to_vec_f32(), &expected, 1e-5);

        let loss = dx.mul(&dx)?.add(&x.mul(&x)?)?.mean()?;
        loss.backward()?;

        let stored = x.grad()?.ok_or(Error::InvalidState("expected a stored gradient".into()))?;
        let expected: Vec<f32> = xs
            .iter()
            .zip(&expected)
            .map(|(&v, &d)| 2.0 / n * (v + d * step(v) * 4.0 / n))
            .collect();
        assert_close(&stored.to_vec_f32(), &expected, 1e-5);

        Ok(())
    }

    pub fn create_graph_accumulation_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = setup_uniform_param(&ctx, &[5, 10], 5)?;
        let n = x.size() as f32;

        let y = x.relu()?;
        let z = y.add_scalar(1.0)?;
        let w = z.mul(&z)?;
        let w_mean = w.mean()?;

        let dx = grad(&[&w_mean], &[&x], GradOptions::default().create_graph(true))?;
        let dx = dx[0].clone().into_tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;

        let xs = x.to_vec_f32();
        let first: Vec<f32> = xs.iter().map(|&v| 1.0 / n * (relu(v) + 1.0) * step(v) * 2.0).collect();
        assert_close(&dx.to_vec_f32(), &first, 1e-5);

        let loss = dx.mul(&dx)?.add(&x.mul(&x)?)?.mean()?;
        let once: Vec<f32> = xs
            .iter()
            .zip(&first)
            .map(|(&v, &d)| 2.0 / n * (v + d * step(v) * 2.0 / n))
            .collect();

        loss.backward_with(gradix_tensor::BackwardOptions::default().retain_graph(true))?;
        let stored = x.grad()?.map(|g| g.to_vec_f32()).unwrap_or_default();
        assert_close(&stored, &once, 1e-5);

        for i in 0..5 {
            loss.backward_with(gradix_tensor::BackwardOptions::default().retain_graph(true))?;
            let stored = x.grad()?.map(|g| g.to_vec_f32()).unwrap_or_default();
            let expected: Vec<f32> = once.iter().map(|v| v * (i + 2) as f32).collect();
            assert_close(&stored, &expected, 1e-4);
        }

        Ok(())
    }

    pub fn leaky_relu_double_grad_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let alpha = 0.2;
        let x = setup_uniform_param(&ctx, &[5, 10], 17)?;

        let l = x.leaky_relu(alpha)?;
        let y = l.mul(&l)?;
        let z = y.mul(&y)?;

        let gy = ctx.uniform_seeded(&[5, 10], 1.0, 2.0, 1)?;
        let gz = ctx.uniform_seeded(&[5, 10], 1.0, 2.0, 2)?;
        let gy_before = gy.to_vec_f32();
        let gz_before = gz.to_vec_f32();

        let dx = grad(
            &[&y, &z],
            &[&x],
            GradOptions::default()
                .grad_outputs(vec![Some(gy.clone()), Some(gz.clone())])
                .create_graph(true),
        )?;
        let dx = dx[0].tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;

        assert!(gy.stop_gradient());
        assert!(gz.stop_gradient());
        assert_eq!(gy.to_vec_f32(), gy_before);
        assert_eq!(gz.to_vec_f32(), gz_before);

        let expected: Vec<f32> = x
            .to_vec_f32()
            .iter()
            .zip(gy_before.iter().zip(&gz_before))
            .map(|(&v, (&a, &b))| {
                let slope = if v > 0.0 { 1.0 } else { alpha as f32 };
                let l = v * slope;
                2.0 * l * slope * a + 4.0 * l * l * l * slope * b
            })
            .collect();
        assert_close(&dx.to_vec_f32(), &expected, 1e-5);

        Ok(())
    }

    pub fn leaky_relu_second_derivative_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let alpha = 0.2;
        let x = setup_uniform_param(&ctx, &[5, 10], 23)?;

        let l = x.leaky_relu(alpha)?;
        let y = l.mul(&l)?.sum()?;

        let dx = grad(&[&y], &[&x], GradOptions::default().create_graph(true))?;
        let dx = dx[0].tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;
        let ddx = grad(&[dx], &[&x], GradOptions::default())?;
        let ddx = ddx[0].tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;

        let expected: Vec<f32> = x
            .to_vec_f32()
            .iter()
            .map(|&v| {
                let slope = if v > 0.0 { 1.0 } else { alpha as f32 };
                2.0 * slope * slope
            })
            .collect();
        assert_close(&ddx.to_vec_f32(), &expected, 1e-5);
        assert!(ddx.stop_gradient());

        Ok(())
    }

    pub fn matmul_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = setup_param(&ctx, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
        let w = setup_param(&ctx, (0..12).map(|v| v as f32 * 0.5).collect(), &[3, 4])?;
        let unused = setup_param(&ctx, vec![0.0; 3], &[3])?;

        let out = x.matmul(&w)?.sum()?;
        let grads = grad(&[&out], &[&x, &w, &unused], GradOptions::default().allow_unused(true))?;

        let wv = w.to_vec_f32();
        let row_sums: Vec<f32> = wv.chunks(4).map(|r| r.iter().sum()).collect();
        let dx: Vec<f32> = (0..2).flat_map(|_| row_sums.iter().copied()).collect();
        assert_close(&grads[0].tensor().map(|t| t.to_vec_f32()).unwrap_or_default(), &dx, 1e-6);

        let xv = x.to_vec_f32();
        let col_sums: Vec<f32> = (0..3).map(|k| xv[k] + xv[3 + k]).collect();
        let dw: Vec<f32> = col_sums.iter().flat_map(|&c| [c; 4]).collect();
        assert_close(&grads[1].tensor().map(|t| t.to_vec_f32()).unwrap_or_default(), &dw, 1e-6);

        assert!(grads[2].is_no_gradient());

        Ok(())
    }

    pub fn stop_gradient_target_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = ctx.tensor(vec![1.0f32, 2.0], &[2])?;
        let w = setup_param(&ctx, vec![3.0, 4.0], &[2])?;
        let y = x.mul(&w)?;

        let request = GradRequest::new(vec![y.clone()], vec![x.clone()]);
        assert!(matches!(ctx.grad(&request), Err(Error::UnusedInput { index: 0, .. })));

        let request = request.with_options(GradOptions::default().allow_unused(true).retain_graph(true));
        let grads = ctx.grad(&request)?;
        assert!(matches!(grads[0], Gradient::NoGradient));

        // the failed requests left the graph usable
        let dw = grad(&[&y], &[&w], GradOptions::default())?;
        assert_eq!(dw[0].tensor().map(|t| t.to_vec_f32()), Some(vec![1.0, 2.0]));

        Ok(())
    }

    pub fn contributions_without_value_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = setup_param(&ctx, vec![1.0, -2.0, 3.0], &[3])?;

        let outputs = ctx.custom_op(
            "round_trip",
            &[&x],
            |inputs| Ok(vec![inputs[0].scale(1.0)?]),
            Some(grad_fn(|_, _, _, _| Ok(vec![None]))),
        )?;

        let grads = grad(&[&outputs[0]], &[&x], GradOptions::default())?;
        let dx = grads[0].tensor().ok_or(Error::InvalidState("zero is still a gradient".into()))?;
        assert_eq!(dx.to_vec_f32(), vec![0.0; 3]);

        Ok(())
    }

    pub fn detached_first_grad_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = setup_uniform_param(&ctx, &[5, 10], 21)?;
        let n = x.size() as f32;

        let w_mean = x.relu()?.add_scalar(1.0)?.square()?.mean()?;
        let dx = grad(&[&w_mean], &[&x], GradOptions::default())?;
        let dx = dx[0].clone().into_tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;
        assert!(dx.stop_gradient());

        let xs = x.to_vec_f32();
        let expected: Vec<f32> = xs.iter().map(|&v| 1.0 / n * (relu(v) + 1.0) * step(v) * 2.0).collect();
        assert_close(&dx.to_vec_f32(), &expected, 1e-5);

        // the detached first-order gradient is a constant of the loss
        let loss = dx.mul(&dx)?.add(&x.mul(&x)?)?.mean()?;
        loss.backward()?;
        let stored = x.grad()?.ok_or(Error::InvalidState("expected a stored gradient".into()))?;
        let expected: Vec<f32> = xs.iter().map(|&v| 2.0 * v / n).collect();
        assert_close(&stored.to_vec_f32(), &expected, 1e-6);

        Ok(())
    }

    pub fn shared_input_grad_matches_backward_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let a = setup_uniform_param(&ctx, &[20, 5], 123)?;
        let weight = ctx.uniform_seeded(&[5, 3], -0.5, 0.5, 7)?;

        // ten consumers of `a`
        let forward = || -> Result<_> {
            let mut out = a.matmul(&weight)?;
            for _ in 1..10 {
                out = out.add(&a.matmul(&weight)?)?;
            }
            Ok(out)
        };

        let dx = grad(&[&forward()?], &[&a], GradOptions::default())?;
        let dx = dx[0].tensor().map(|t| t.to_vec_f32()).unwrap_or_default();

        forward()?.backward()?;
        let stored = a.grad()?.map(|g| g.to_vec_f32()).unwrap_or_default();
        assert_eq!(dx.len(), 100);
        assert_eq!(dx, stored);

        Ok(())
    }

    pub fn mixed_initial_gradients_test(order: AccumulationOrder) -> Result<()> {
        let ctx = setup_context(order);
        let x = setup_param(&ctx, vec![0.5, -1.0, 2.0], &[3])?;
        let seed = ctx.tensor(vec![3.0f32, 0.5, -2.0], &[3])?;

        for create_graph in [false, true] {
            let y1 = x.square()?;
            let y2 = x.exp()?;
            let dx = grad(
                &[&y1, &y2],
                &[&x],
                GradOptions::default()
                    .grad_outputs(vec![None, Some(seed.clone())])
                    .create_graph(create_graph),
            )?;
            let dx = dx[0].tensor().ok_or(Error::InvalidState("expected a gradient".into()))?;
            assert_eq!(dx.stop_gradient(), !create_graph);

            let expected: Vec<f32> = x
                .to_vec_f32()
                .iter()
                .zip(seed.to_vec_f32())
                .map(|(&v, s)| 2.0 * v + v.exp() * s)
                .collect();
            assert_close(&dx.to_vec_f32(), &expected, 1e-6);

            // caller seeds are read, never written
            assert_eq!(seed.to_vec_f32(), vec![3.0, 0.5, -2.0]);
            assert!(seed.stop_gradient());
            assert!(seed.grad()?.is_none());
        }

        Ok(())
    }
}

#[test]
fn accumulation_order_changes_rounding() -> Result<()> {
    let mut results = Vec::new();
    for order in [AccumulationOrder::Insertion, AccumulationOrder::Sorted] {
        let ctx = setup_context(order);
        let x = setup_param(&ctx, vec![1.0], &[])?;
        let y1 = x.scale(1.0)?;
        let y2 = x.scale(1e8)?;
        let y3 = x.scale(-1e8)?;

        let dx = grad(&[&y1, &y2, &y3], &[&x], GradOptions::default())?;
        results.push(dx[0].tensor().map(|t| t.to_vec_f32()).unwrap_or_default());
    }

    // newest consumer first: (-1e8 + 1e8) + 1
    assert_eq!(results[0], vec![1.0]);
    // creation order: (1 + 1e8) + -1e8, where 1 is lost to f32 rounding
    assert_eq!(results[1], vec![0.0]);

    Ok(())
}

#[test]
fn sorted_order_is_deterministic() -> Result<()> {
    let run = || -> Result<Vec<f32>> {
        let ctx = setup_context(AccumulationOrder::Sorted);
        let x = setup_uniform_param(&ctx, &[4, 8], 99)?;
        let parts: Vec<_> = (1..6).map(|k| x.scale(k as f64 * 0.1)).collect::<Result<_>>()?;
        let mut total = parts[0].tanh()?;
        for part in &parts[1..] {
            total = total.add(&part.sigmoid()?)?;
        }
        let out = total.sum()?;
        let dx = grad(&[&out], &[&x], GradOptions::default())?;
        Ok(dx[0].tensor().map(|t| t.to_vec_f32()).unwrap_or_default())
    };

    assert_eq!(run()?, run()?);

    Ok(())
}

#[test]
fn independent_contexts_on_threads() -> Result<()> {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || -> Result<Vec<f32>> {
                let ctx = setup_context(AccumulationOrder::Insertion);
                let x = setup_param(&ctx, vec![i as f32, 1.0, 2.0], &[3])?;
                let y = x.mul(&x)?.sum()?;
                let dx = grad(&[&y], &[&x], GradOptions::default())?;
                Ok(dx[0].tensor().map(|t| t.to_vec_f32()).unwrap_or_default())
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let dx = handle
            .join()
            .map_err(|_| Error::InvalidState("worker panicked".into()))??;
        assert_eq!(dx, vec![2.0 * i as f32, 2.0, 4.0]);
    }

    Ok(())
}
