//! Smoke test of the public facade
use approx::assert_abs_diff_eq;
use chanorm::prelude::*;

#[test]
fn test_training_then_evaluation() {
    let input = Tensor::<f64>::from_vec(vec![1.0, 4.0, 3.0, 8.0, 5.0, 12.0], &[3, 2]).unwrap();
    let mut running_mean = Tensor::<f64>::zeros(&[2]);
    let mut running_var = Tensor::<f64>::ones(&[2]);
    let config = NormConfig::default().with_momentum(1.0);
    config.validate().unwrap();

    let mut params =
        NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);
    let trained = batch_norm(&input, &mut params, true, config.momentum, config.eps).unwrap();

    // momentum 1 copies the batch statistics into the running statistics, so an
    // evaluation pass over the same batch reproduces the training output up to the
    // biased/unbiased variance ratio n / (n - 1)
    let mut params =
        NormalizationParameters::new().with_running_stats(&mut running_mean, &mut running_var);
    let evaluated = batch_norm(&input, &mut params, false, config.momentum, 0.0).unwrap();
    let ratio = (2.0f64 / 3.0).sqrt();
    for (e, t) in evaluated.to_vec().iter().zip(trained.to_vec()) {
        assert_abs_diff_eq!(*e, t * ratio, epsilon = 1e-4);
    }
    assert_eq!(running_mean.to_vec(), vec![3.0, 8.0]);
}

#[test]
fn test_renorm_and_instance_norm() {
    let rows = Tensor::<f32>::from_vec(vec![6.0, 8.0, 0.0, 2.0], &[2, 2]).unwrap();
    let clamped = renorm(&rows, 2.0, 0, 5.0).unwrap();
    assert_eq!(clamped.to_vec(), vec![3.0, 4.0, 0.0, 2.0]);

    let input = Tensor::<f32>::from_vec(vec![1.0, 3.0, 2.0, 6.0], &[2, 1, 2]).unwrap();
    let output = instance_norm(
        &input,
        None,
        None,
        None,
        None,
        true,
        0.1,
        0.0,
        &BackendCapabilities::cpu_only(),
    )
    .unwrap();
    assert_eq!(output.to_vec(), vec![-1.0, 1.0, -1.0, 1.0]);
}

#[test]
fn test_errors_are_typed() {
    let input = Tensor::<f32>::ones(&[2, 3]);
    let weight = Tensor::<f32>::ones(&[4]);
    let mut params = NormalizationParameters::new().with_weight(&weight);
    let err = batch_norm(&input, &mut params, true, 0.1, 1e-5).unwrap_err();
    assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    assert!(err.to_string().contains("batch_norm"));
}
