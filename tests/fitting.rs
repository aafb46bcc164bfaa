use std::sync::Arc;

use splot::fitter::models::{GaussianModel, LorentzianModel, SuperGaussianModel};
use splot::fitter::{
    CurveStatistics, CustomModel, FitInput, FitOptions, FitRequest, ModelRegistry, PeakSummary,
    Weighting, fit_with_estimate,
};
use splot::{Constraint, FitError, FitModel, fit};

fn scan(model: &dyn FitModel, params: &[f64], points: i32, step: f64) -> FitInput {
    let x: Vec<f64> = (0..points).map(|i| f64::from(i) * step).collect();
    let y = model.evaluate(params, &x);
    FitInput::new(x, y)
}

#[test]
fn gaussian_peak_with_small_ripple() {
    let mut input = scan(&GaussianModel, &[1.0, 0.0, 10.0, 9.3, 2.5], 201, 0.1);
    for (i, y) in input.y.iter_mut().enumerate() {
        *y += 0.05 * (17.0 * i as f64).sin();
    }

    let result = fit_with_estimate(&GaussianModel, &input, &FitOptions::default())
        .expect("gaussian fit");
    assert!(result.converged);
    assert!((result.parameters[3] - 9.3).abs() < 0.05);
    assert!((result.parameters[4] - 2.5).abs() < 0.05);
    assert!(result.uncertainties.iter().all(|u| u.is_finite()));

    let peak = PeakSummary::from_result(&result).expect("peak summary");
    let expected_area = 10.0 * 2.5 / splot::fitter::models::FWHM_PER_SIGMA
        * (2.0 * std::f64::consts::PI).sqrt();
    assert!((peak.area.value - expected_area).abs() / expected_area < 0.02);
    assert!(peak.area.uncertainty > 0.0);
}

#[test]
fn lorentzian_peak_summary() {
    let input = scan(&LorentzianModel, &[0.5, 0.0, 3.0, 4.0, 0.8], 161, 0.05);
    let result = fit_with_estimate(&LorentzianModel, &input, &FitOptions::default())
        .expect("lorentzian fit");
    let peak = PeakSummary::from_result(&result).expect("peak summary");
    assert!((peak.height.value - 6.0 / std::f64::consts::PI).abs() < 1e-3);
    assert!((peak.area.value - 2.4).abs() < 1e-2);
}

#[test]
fn super_gaussian_shape_stays_in_bounds() {
    let input = scan(
        &SuperGaussianModel,
        &[0.2, 0.0, 5.0, 6.0, 3.0, 4.0],
        241,
        0.05,
    );
    let result = fit_with_estimate(&SuperGaussianModel, &input, &FitOptions::default())
        .expect("super-gaussian fit");
    let shape = result.parameters[5];
    assert!((1.0..=20.0).contains(&shape));
    assert!((shape - 4.0).abs() < 1e-2);
    assert!((result.parameters[4] - 3.0).abs() < 1e-3);
}

#[test]
fn poisson_weighting_on_counts() {
    let input = scan(&GaussianModel, &[20.0, 0.0, 400.0, 50.0, 12.0], 101, 1.0);
    let options = FitOptions {
        weighting: Weighting::Poisson,
        ..FitOptions::default()
    };
    let result = fit(
        &GaussianModel,
        &[25.0, 0.0, 350.0, 48.0, 10.0],
        &[
            Constraint::Free,
            Constraint::Fixed,
            Constraint::Positive,
            Constraint::Free,
            Constraint::Positive,
        ],
        &input,
        &options,
    )
    .expect("poisson fit");
    assert!((result.parameters[2] - 400.0).abs() < 1e-3);
    assert!((result.parameters[3] - 50.0).abs() < 1e-4);
    assert_eq!(result.degrees_of_freedom, 97);
}

#[test]
fn custom_model_through_registry() {
    let exponential = CustomModel::new(
        "decay",
        &["amplitude", "rate"],
        |p, x| x.iter().map(|&xi| p[0] * (-p[1] * xi).exp()).collect(),
        |_, _, stats: &CurveStatistics| vec![stats.max, 1.0],
    );
    let mut registry = ModelRegistry::with_builtin_models();
    registry.register(Arc::new(exponential));

    let x: Vec<f64> = (0..50).map(|i| f64::from(i) * 0.1).collect();
    let y: Vec<f64> = x.iter().map(|xi| 3.0 * (-0.7 * xi).exp()).collect();
    let result = FitRequest::new("decay", FitInput::new(x, y))
        .run(&registry)
        .expect("decay fit");
    assert!((result.parameters[0] - 3.0).abs() < 1e-5);
    assert!((result.parameters[1] - 0.7).abs() < 1e-5);
}

#[test]
fn mismatched_lengths_are_rejected() {
    let input = FitInput::new(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0]).with_sigma(vec![1.0]);
    let err = fit_with_estimate(&GaussianModel, &input, &FitOptions::default())
        .expect_err("sigma too short");
    assert!(matches!(
        err,
        FitError::LengthMismatch {
            x: 3,
            y: 3,
            sigma: Some(1)
        }
    ));
}

#[test]
fn ignored_background_is_zero() {
    let input = scan(&GaussianModel, &[0.0, 0.0, 4.0, 3.0, 1.0], 61, 0.1);
    let result = fit(
        &GaussianModel,
        &[0.5, 0.1, 3.0, 2.8, 1.2],
        &[
            Constraint::Ignored,
            Constraint::Ignored,
            Constraint::Free,
            Constraint::Free,
            Constraint::Positive,
        ],
        &input,
        &FitOptions::default(),
    )
    .expect("fit without background");
    assert_eq!(result.parameters[0], 0.0);
    assert_eq!(result.parameters[1], 0.0);
    assert_eq!(result.uncertainties[0], 0.0);
    assert!((result.parameters[2] - 4.0).abs() < 1e-5);
}
