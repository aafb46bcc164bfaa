use std::f64::consts::LN_2;

use super::{FitModel, flat_background, guarded_exp};
use crate::fitter::constraints::Constraint;
use crate::fitter::statistics::CurveStatistics;

/// Flat-topped generalisation of the Gaussian,
/// `a + b·x + h·exp(-ln2·|2(x - x0)/fwhm|^p)`.
///
/// Parameters: `[background, slope, height, position, fwhm, shape]`. A shape
/// of 2 is exactly [`super::GaussianModel`]; the FWHM stays exact for any shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct SuperGaussianModel;

impl SuperGaussianModel {
    pub fn super_gaussian(x: f64, height: f64, position: f64, fwhm: f64, shape: f64) -> f64 {
        if fwhm == 0.0 {
            return 0.0;
        }
        let u = (2.0 * (x - position) / fwhm).abs();
        height * guarded_exp(-LN_2 * u.powf(shape))
    }
}

impl FitModel for SuperGaussianModel {
    fn name(&self) -> &str {
        "super_gaussian"
    }

    fn parameter_names(&self) -> Vec<String> {
        ["background", "slope", "height", "position", "fwhm", "shape"]
            .iter()
            .map(|&n| n.to_owned())
            .collect()
    }

    fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64> {
        let (a, b, h, x0, fwhm, shape) = (
            params[0], params[1], params[2], params[3], params[4], params[5],
        );
        x.iter()
            .map(|&xi| a + b * xi + Self::super_gaussian(xi, h, x0, fwhm, shape))
            .collect()
    }

    fn estimate_parameters(&self, x: &[f64], y: &[f64], stats: &CurveStatistics) -> Vec<f64> {
        let background = flat_background(x, y);
        let fwhm = if stats.fwhm > 0.0 { stats.fwhm } else { 1.0 };
        vec![
            background,
            0.0,
            stats.peak_height - background,
            stats.peak,
            fwhm,
            2.0,
        ]
    }

    fn default_constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::Free,
            Constraint::Free,
            Constraint::Free,
            Constraint::Free,
            Constraint::Positive,
            Constraint::Quoted {
                low: 1.0,
                high: 20.0,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::models::GaussianModel;

    #[test]
    fn test_shape_two_is_gaussian() {
        let x: Vec<f64> = (0..50).map(|i| f64::from(i) * 0.2).collect();
        let sg = SuperGaussianModel.evaluate(&[1.0, 0.1, 4.0, 5.0, 1.5, 2.0], &x);
        let g = GaussianModel.evaluate(&[1.0, 0.1, 4.0, 5.0, 1.5], &x);
        for (a, b) in sg.iter().zip(&g) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_half_maximum_independent_of_shape() {
        for shape in [1.0, 2.0, 4.0, 10.0] {
            let y = SuperGaussianModel.evaluate(&[0.0, 0.0, 2.0, 0.0, 3.0, shape], &[1.5, -1.5]);
            assert!((y[0] - 1.0).abs() < 1e-12);
            assert!((y[1] - 1.0).abs() < 1e-12);
        }
    }
}
