use super::FitModel;
use crate::fitter::constraints::Constraint;
use crate::fitter::statistics::CurveStatistics;

/// Increasing Hill sigmoid, `y0 + A·xⁿ/(Kⁿ + xⁿ)`.
///
/// Parameters: `[y0, amplitude, k, n]`. Non-positive `x` gives the baseline.
#[derive(Debug, Default, Clone, Copy)]
pub struct HillModel;

impl HillModel {
    pub const MIN_EXPONENT: f64 = 0.5;
    pub const MAX_EXPONENT: f64 = 6.0;

    fn hill(x: f64, amplitude: f64, k: f64, n: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        let ratio = (k.abs() / x).powf(n);
        amplitude / (1.0 + ratio)
    }

    /// x where the curve, sorted by x, first reaches `level`.
    fn interpolate_crossing(x: &[f64], y: &[f64], level: f64) -> Option<f64> {
        let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        pairs.windows(2).find_map(|w| {
            let ((x0, y0), (x1, y1)) = (w[0], w[1]);
            if (y0 - level) * (y1 - level) > 0.0 || y0 == y1 {
                return None;
            }
            Some(x0 + (level - y0) * (x1 - x0) / (y1 - y0))
        })
    }
}

impl FitModel for HillModel {
    fn name(&self) -> &str {
        "hill"
    }

    fn parameter_names(&self) -> Vec<String> {
        ["y0", "amplitude", "k", "n"]
            .iter()
            .map(|&n| n.to_owned())
            .collect()
    }

    fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64> {
        let (y0, amplitude, k, n) = (params[0], params[1], params[2], params[3]);
        x.iter()
            .map(|&xi| y0 + Self::hill(xi, amplitude, k, n))
            .collect()
    }

    fn estimate_parameters(&self, x: &[f64], y: &[f64], stats: &CurveStatistics) -> Vec<f64> {
        let y0 = stats.min;
        let amplitude = stats.max - stats.min;
        let k = Self::interpolate_crossing(x, y, y0 + 0.5 * amplitude)
            .filter(|&k| k > 0.0)
            .unwrap_or_else(|| {
                let positive: Vec<f64> = x.iter().copied().filter(|&v| v > 0.0).collect();
                if positive.is_empty() {
                    1.0
                } else {
                    positive.iter().sum::<f64>() / positive.len() as f64
                }
            });
        vec![y0, amplitude, k, 2.0]
    }

    fn default_constraints(&self) -> Vec<Constraint> {
        vec![
            Constraint::Free,
            Constraint::Free,
            Constraint::Positive,
            Constraint::Quoted {
                low: Self::MIN_EXPONENT,
                high: Self::MAX_EXPONENT,
            },
        ]
    }
}
