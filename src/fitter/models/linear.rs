use super::FitModel;
use crate::fitter::common::tail_means;
use crate::fitter::statistics::CurveStatistics;

/// Straight line, `intercept + slope·x`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearModel;

impl LinearModel {
    /// Secant through the averaged first and last points.
    pub fn secant(x: &[f64], y: &[f64]) -> (f64, f64) {
        let ((x0, y0), (x1, y1)) = tail_means(x, y);
        let slope = if x1 != x0 { (y1 - y0) / (x1 - x0) } else { 0.0 };
        (y0 - slope * x0, slope)
    }
}

impl FitModel for LinearModel {
    fn name(&self) -> &str {
        "linear"
    }

    fn parameter_names(&self) -> Vec<String> {
        vec!["intercept".to_owned(), "slope".to_owned()]
    }

    fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| params[0] + params[1] * xi).collect()
    }

    fn estimate_parameters(&self, x: &[f64], y: &[f64], _stats: &CurveStatistics) -> Vec<f64> {
        let (intercept, slope) = Self::secant(x, y);
        vec![intercept, slope]
    }

    fn is_linear(&self) -> bool {
        true
    }

    fn derivative(&self, _params: &[f64], index: usize, x: &[f64]) -> Option<Vec<f64>> {
        match index {
            0 => Some(vec![1.0; x.len()]),
            1 => Some(x.to_vec()),
            _ => None,
        }
    }
}
