use super::{FWHM_PER_SIGMA, FitModel, flat_background, guarded_exp};
use crate::fitter::constraints::Constraint;
use crate::fitter::statistics::CurveStatistics;

/// Gaussian peak on a linear background,
/// `a + b·x + h·exp(-0.5·((x - x0)/σ)²)` with `σ = fwhm / 2.3548`.
///
/// Parameters: `[background, slope, height, position, fwhm]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GaussianModel;

impl GaussianModel {
    pub const BACKGROUND: usize = 0;
    pub const SLOPE: usize = 1;
    pub const HEIGHT: usize = 2;
    pub const POSITION: usize = 3;
    pub const FWHM: usize = 4;

    /// `(u, exp(-u²/2))` with `u = (x - x0)/σ`, or `None` for a zero width.
    fn reduced(x: f64, position: f64, fwhm: f64) -> Option<(f64, f64)> {
        if fwhm == 0.0 {
            return None;
        }
        let sigma = fwhm / FWHM_PER_SIGMA;
        let u = (x - position) / sigma;
        Some((u, guarded_exp(-0.5 * u * u)))
    }

    pub fn gaussian(x: f64, height: f64, position: f64, fwhm: f64) -> f64 {
        Self::reduced(x, position, fwhm).map_or(0.0, |(_, g)| height * g)
    }

    fn gaussian_pd_position(x: f64, height: f64, position: f64, fwhm: f64) -> f64 {
        Self::reduced(x, position, fwhm).map_or(0.0, |(u, g)| {
            let sigma = fwhm / FWHM_PER_SIGMA;
            height * g * u / sigma
        })
    }

    fn gaussian_pd_fwhm(x: f64, height: f64, position: f64, fwhm: f64) -> f64 {
        Self::reduced(x, position, fwhm).map_or(0.0, |(u, g)| height * g * u * u / fwhm)
    }
}

impl FitModel for GaussianModel {
    fn name(&self) -> &str {
        "gaussian"
    }

    fn parameter_names(&self) -> Vec<String> {
        ["background", "slope", "height", "position", "fwhm"]
            .iter()
            .map(|&n| n.to_owned())
            .collect()
    }

    fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64> {
        let (a, b, h, x0, fwhm) = (params[0], params[1], params[2], params[3], params[4]);
        x.iter()
            .map(|&xi| a + b * xi + Self::gaussian(xi, h, x0, fwhm))
            .collect()
    }

    fn estimate_parameters(&self, x: &[f64], y: &[f64], stats: &CurveStatistics) -> Vec<f64> {
        let background = flat_background(x, y);
        let fwhm = if stats.fwhm > 0.0 {
            stats.fwhm
        } else {
            1.0
        };
        vec![
            background,
            0.0,
            stats.peak_height - background,
            stats.peak,
            fwhm,
        ]
    }

    fn default_constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::Free,
            Constraint::Free,
            Constraint::Free,
            Constraint::Free,
            Constraint::Positive,
        ]
    }

    fn derivative(&self, params: &[f64], index: usize, x: &[f64]) -> Option<Vec<f64>> {
        let (h, x0, fwhm) = (params[2], params[3], params[4]);
        let column = match index {
            Self::BACKGROUND => vec![1.0; x.len()],
            Self::SLOPE => x.to_vec(),
            Self::HEIGHT => x.iter().map(|&xi| Self::gaussian(xi, 1.0, x0, fwhm)).collect(),
            Self::POSITION => x
                .iter()
                .map(|&xi| Self::gaussian_pd_position(xi, h, x0, fwhm))
                .collect(),
            Self::FWHM => x
                .iter()
                .map(|&xi| Self::gaussian_pd_fwhm(xi, h, x0, fwhm))
                .collect(),
            _ => return None,
        };
        Some(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn central_difference(params: &[f64], index: usize, x: &[f64]) -> Vec<f64> {
        let step = 1e-6;
        let mut up = params.to_vec();
        let mut down = params.to_vec();
        up[index] += step;
        down[index] -= step;
        let fu = GaussianModel.evaluate(&up, x);
        let fd = GaussianModel.evaluate(&down, x);
        fu.iter()
            .zip(&fd)
            .map(|(u, d)| (u - d) / (2.0 * step))
            .collect()
    }

    #[test]
    fn test_gaussian_peak_and_half_maximum() {
        let params = [1.0, 0.0, 10.0, 5.0, 2.0];
        let y = GaussianModel.evaluate(&params, &[5.0, 4.0, 6.0]);
        assert!((y[0] - 11.0).abs() < 1e-12);
        // half maximum sits at position ± fwhm/2
        assert!((y[1] - 6.0).abs() < 1e-12);
        assert!((y[2] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_analytic_derivatives_match_finite_differences() {
        let params = [0.5, 0.1, 3.0, 1.0, 1.5];
        let x: Vec<f64> = (-10..=10).map(|i| f64::from(i) * 0.3).collect();
        for index in 0..5 {
            let analytic = GaussianModel.derivative(&params, index, &x).unwrap();
            let numeric = central_difference(&params, index, &x);
            for (a, n) in analytic.iter().zip(&numeric) {
                assert!((a - n).abs() < 1e-6, "parameter {index}: {a} vs {n}");
            }
        }
        assert!(GaussianModel.derivative(&params, 5, &x).is_none());
    }

    #[test]
    fn test_zero_width_is_background_only() {
        let y = GaussianModel.evaluate(&[2.0, 0.0, 5.0, 0.0, 0.0], &[0.0, 1.0]);
        assert_eq!(y, vec![2.0, 2.0]);
    }

    #[test]
    fn test_estimate_uses_statistics() {
        let x: Vec<f64> = (0..41).map(|i| f64::from(i) * 0.25).collect();
        let y = GaussianModel.evaluate(&[2.0, 0.0, 8.0, 5.0, 1.2], &x);
        let stats = CurveStatistics::compute(&x, &y);
        let guess = GaussianModel.estimate_parameters(&x, &y, &stats);

        assert!((guess[0] - 2.0).abs() < 1e-3);
        assert_eq!(guess[1], 0.0);
        assert!((guess[2] - 8.0).abs() < 1e-3);
        assert!((guess[3] - 5.0).abs() < 1e-12);
        assert!((guess[4] - 1.2).abs() < 0.1);
    }
}
