extern crate icnet_seg;

use icnet_seg::common::{Reduction, TrainConfig};
use icnet_seg::losses::{focal_backward, focal_forward, log_one_minus_sigmoid, log_sigmoid, sigmoid, FocalLoss, LossValue};
use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_grid(seed: u64, n: usize) -> (Array1<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let logits = Array1::from_shape_fn(n, |_| rng.gen_range(-6.0..6.0));
    let labels = Array1::from_shape_fn(n, |_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 });
    (logits, labels)
}

#[test]
fn forward_at_zero_logit() {
    let logits = array![0.0f64];
    let labels = array![1.0f64];
    let (loss, _) = focal_forward(logits.view(), labels.view(), 0.25, 2.0).unwrap();

    // coeff = -(1 - 0.5)^2, ce = 0.25 * ln(0.5)
    let coeff = -0.25;
    let ce = 0.25 * 0.5f64.ln();
    assert!((ce - (-0.1732868)).abs() < 1e-6);
    assert!((loss[0] - ce * coeff).abs() < 1e-12);
    assert!((loss[0] - 0.0433217).abs() < 1e-6);
}

#[test]
fn log_sigmoid_terms_stay_finite() {
    for &x in &[-1000.0f64, -50.0, -1.0, 0.0, 1.0, 50.0, 1000.0] {
        assert!(log_sigmoid(x).is_finite(), "log_sigmoid({})", x);
        assert!(log_one_minus_sigmoid(x).is_finite(), "log_one_minus_sigmoid({})", x);
    }
    for &x in &[-5.0f64, -0.3, 0.0, 0.7, 4.0] {
        let p = 1.0 / (1.0 + (-x).exp());
        assert!((log_sigmoid(x) - p.ln()).abs() < 1e-12);
        assert!((log_one_minus_sigmoid(x) - (1.0 - p).ln()).abs() < 1e-12);
        assert!((sigmoid(x) - p).abs() < 1e-14);
    }
    assert_eq!(log_sigmoid(-1000.0f64), -1000.0);
    assert_eq!(log_one_minus_sigmoid(1000.0f64), -1000.0);
}

#[test]
fn forward_handles_extreme_logits() {
    let logits = array![1000.0f32, -1000.0, 1000.0, -1000.0];
    let labels = array![1.0f32, 0.0, 0.0, 1.0];
    let (loss, ctx) = focal_forward(logits.view(), labels.view(), 0.25, 2.0).unwrap();

    assert!(loss.iter().all(|v| v.is_finite()));
    assert_eq!(loss[0], 0.0);
    assert_eq!(loss[1], 0.0);
    // confidently wrong: coeff = -1, ce = -1000 * weight
    assert!((loss[2] - 750.0).abs() < 1e-3);
    assert!((loss[3] - 250.0).abs() < 1e-3);

    let grad = focal_backward(&ctx, Array1::ones(4).view()).unwrap();
    assert!(grad.iter().all(|v| v.is_finite()));
}

#[test]
fn backward_matches_finite_differences() {
    let (logits, labels) = random_grid(42, 200);
    let (alpha, gamma) = (0.25, 2.0);
    let (_, ctx) = focal_forward(logits.view(), labels.view(), alpha, gamma).unwrap();
    let grad = focal_backward(&ctx, Array1::ones(logits.len()).view()).unwrap();

    let h = 1e-5;
    for i in 0..logits.len() {
        let mut plus = logits.clone();
        let mut minus = logits.clone();
        plus[i] += h;
        minus[i] -= h;
        let (lp, _) = focal_forward(plus.view(), labels.view(), alpha, gamma).unwrap();
        let (lm, _) = focal_forward(minus.view(), labels.view(), alpha, gamma).unwrap();
        let numeric = (lp[i] - lm[i]) / (2.0 * h);
        assert!(
            (numeric - grad[i]).abs() < 1e-4,
            "logit {} label {}: analytic {} vs numeric {}",
            logits[i], labels[i], grad[i], numeric
        );
    }
}

#[test]
fn backward_matches_finite_differences_other_parameters() {
    let (logits, labels) = random_grid(7, 100);
    for &(alpha, gamma) in &[(0.5, 1.0), (0.75, 3.0), (0.25, 1.5)] {
        let (_, ctx) = focal_forward(logits.view(), labels.view(), alpha, gamma).unwrap();
        let upstream = Array1::from_elem(logits.len(), 0.5);
        let grad = focal_backward(&ctx, upstream.view()).unwrap();

        let h = 1e-5;
        for i in 0..logits.len() {
            let mut plus = logits.clone();
            let mut minus = logits.clone();
            plus[i] += h;
            minus[i] -= h;
            let (lp, _) = focal_forward(plus.view(), labels.view(), alpha, gamma).unwrap();
            let (lm, _) = focal_forward(minus.view(), labels.view(), alpha, gamma).unwrap();
            let numeric = 0.5 * (lp[i] - lm[i]) / (2.0 * h);
            assert!((numeric - grad[i]).abs() < 1e-4, "alpha={} gamma={} i={}", alpha, gamma, i);
        }
    }
}

#[test]
fn mean_reduction_gradient_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(3);
    let logits = Array2::from_shape_fn((4, 5), |_| rng.gen_range(-4.0..4.0));
    let labels = Array2::from_shape_fn((4, 5), |(i, j)| ((i + j) % 2) as f64);
    let criterion = FocalLoss::new(0.25f64, 2.0, Reduction::Mean);

    let (value, ctx) = criterion.forward(logits.view(), labels.view()).unwrap();
    assert!(value.scalar().is_some());
    let grad = criterion.backward(&ctx, &LossValue::Scalar(1.0)).unwrap();

    let h = 1e-5;
    for ((i, j), g) in grad.indexed_iter() {
        let mut plus = logits.clone();
        let mut minus = logits.clone();
        plus[[i, j]] += h;
        minus[[i, j]] -= h;
        let lp = criterion.forward(plus.view(), labels.view()).unwrap().0.scalar().unwrap();
        let lm = criterion.forward(minus.view(), labels.view()).unwrap().0.scalar().unwrap();
        assert!(((lp - lm) / (2.0 * h) - g).abs() < 1e-4);
    }
}

#[test]
fn reductions_fold_elementwise_loss() {
    let (logits, labels) = random_grid(11, 16);
    let none = FocalLoss::new(0.25f64, 2.0, Reduction::None);
    let sum = FocalLoss::new(0.25f64, 2.0, Reduction::Sum);
    let mean = FocalLoss::new(0.25f64, 2.0, Reduction::Mean);

    let (elementwise, _) = none.forward(logits.view(), labels.view()).unwrap();
    let elementwise = elementwise.elementwise().unwrap().clone();
    let (s, _) = sum.forward(logits.view(), labels.view()).unwrap();
    let (m, _) = mean.forward(logits.view(), labels.view()).unwrap();

    assert!((s.scalar().unwrap() - elementwise.sum()).abs() < 1e-12);
    assert!((m.scalar().unwrap() - elementwise.sum() / 16.0).abs() < 1e-12);
}

#[test]
fn sum_reduction_backward_is_unit_scaled() {
    let (logits, labels) = random_grid(5, 8);
    let sum = FocalLoss::new(0.25f64, 2.0, Reduction::Sum);
    let (_, ctx) = sum.forward(logits.view(), labels.view()).unwrap();
    let from_sum = sum.backward(&ctx, &LossValue::Scalar(1.0)).unwrap();
    let direct = focal_backward(&ctx, Array1::ones(8).view()).unwrap();
    assert_eq!(from_sum, direct);
}

#[test]
fn backward_rejects_mismatched_upstream_gradient() {
    let (logits, labels) = random_grid(1, 4);
    let mean = FocalLoss::new(0.25f64, 2.0, Reduction::Mean);
    let (_, ctx) = mean.forward(logits.view(), labels.view()).unwrap();
    assert!(mean.backward(&ctx, &LossValue::Elementwise(Array1::ones(4))).is_err());

    let none = FocalLoss::new(0.25f64, 2.0, Reduction::None);
    let (_, ctx) = none.forward(logits.view(), labels.view()).unwrap();
    assert!(none.backward(&ctx, &LossValue::Scalar(1.0)).is_err());
    assert!(none.backward(&ctx, &LossValue::Elementwise(Array1::ones(3))).is_err());
}

#[test]
fn forward_rejects_shape_mismatch() {
    let logits = array![0.0f32, 1.0];
    let labels = array![1.0f32];
    assert!(focal_forward(logits.view(), labels.view(), 0.25, 2.0).is_err());
}

#[test]
fn default_parameters_and_reduction_names() {
    let criterion: FocalLoss<f32> = FocalLoss::default();
    assert_eq!(criterion.alpha, 0.25);
    assert_eq!(criterion.gamma, 2.0);
    assert_eq!(criterion.reduction, Reduction::Mean);

    assert_eq!(Reduction::from_str("SUM"), Some(Reduction::Sum));
    assert_eq!(Reduction::from_str("none"), Some(Reduction::None));
    assert_eq!(Reduction::from_str("max"), None);
    assert!(Reduction::is_valid_reduction("mean"));
    assert_eq!(Reduction::all_reductions(), vec!["mean", "sum", "none"]);
}

#[test]
fn focal_loss_from_config() {
    let config = TrainConfig::new().with_focal(0.5, 1.0, Reduction::Sum);
    let criterion = FocalLoss::from_config(&config);
    assert_eq!(criterion, FocalLoss::new(0.5f32, 1.0, Reduction::Sum));

    let logits = array![0.0f32, 2.0];
    let labels = array![1.0f32, 0.0];
    let (value, _) = criterion.forward(logits.view(), labels.view()).unwrap();
    let (elementwise, _) = focal_forward(logits.view(), labels.view(), 0.5, 1.0).unwrap();
    assert!((value.scalar().unwrap() - elementwise.sum()).abs() < 1e-6);

    let parsed: TrainConfig = serde_json::from_str(r#"{"focal_reduction": "none"}"#).unwrap();
    assert_eq!(FocalLoss::from_config(&parsed).reduction, Reduction::None);
}
