use std::f64::consts::{FRAC_2_PI, PI};

use super::{FitModel, flat_background};
use crate::fitter::constraints::Constraint;
use crate::fitter::statistics::CurveStatistics;

/// Lorentzian peak on a linear background,
/// `a + b·x + 2·A / (π·(1 + ((x - x0)/hwhm)²))` with `hwhm = fwhm / 2`.
///
/// Parameters: `[background, slope, amplitude, position, fwhm]`. The peak
/// maximum above background is `2·A/π`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LorentzianModel;

impl LorentzianModel {
    pub fn lorentzian(x: f64, amplitude: f64, position: f64, fwhm: f64) -> f64 {
        if fwhm == 0.0 {
            return 0.0;
        }
        let u = (x - position) / (0.5 * fwhm);
        FRAC_2_PI * amplitude / (1.0 + u * u)
    }
}

impl FitModel for LorentzianModel {
    fn name(&self) -> &str {
        "lorentzian"
    }

    fn parameter_names(&self) -> Vec<String> {
        ["background", "slope", "amplitude", "position", "fwhm"]
            .iter()
            .map(|&n| n.to_owned())
            .collect()
    }

    fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64> {
        let (a, b, amplitude, x0, fwhm) = (params[0], params[1], params[2], params[3], params[4]);
        x.iter()
            .map(|&xi| a + b * xi + Self::lorentzian(xi, amplitude, x0, fwhm))
            .collect()
    }

    fn estimate_parameters(&self, x: &[f64], y: &[f64], stats: &CurveStatistics) -> Vec<f64> {
        let background = flat_background(x, y);
        let fwhm = if stats.fwhm > 0.0 { stats.fwhm } else { 1.0 };
        vec![
            background,
            0.0,
            0.5 * PI * (stats.peak_height - background),
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lorentzian_shape() {
        let params = [0.0, 0.0, PI, 2.0, 4.0];
        let y = LorentzianModel.evaluate(&params, &[2.0, 0.0, 4.0]);
        // peak = 2A/π = 2, half of it at x0 ± hwhm
        assert!((y[0] - 2.0).abs() < 1e-12);
        assert!((y[1] - 1.0).abs() < 1e-12);
        assert!((y[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_reproduces_peak_height() {
        let x: Vec<f64> = (0..101).map(|i| f64::from(i) * 0.1).collect();
        let y = LorentzianModel.evaluate(&[1.0, 0.0, 3.0, 5.0, 0.8], &x);
        let stats = CurveStatistics::compute(&x, &y);
        let guess = LorentzianModel.estimate_parameters(&x, &y, &stats);
        assert!((guess[3] - 5.0).abs() < 1e-12);
        // the tails of a Lorentzian are heavy, so the background guess sits a bit high
        assert!(guess[0] > 1.0 && guess[0] < 1.1);
        let peak = LorentzianModel.evaluate(&guess, &[guess[3]])[0];
        assert!((peak - stats.peak_height).abs() < 1e-9);
    }
}
