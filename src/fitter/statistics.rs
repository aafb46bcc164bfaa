/// Summary numbers of a scan curve, the same ones shown in the plot header
/// and used to seed the peak models.
#[derive(PartialEq, Default, Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct CurveStatistics {
    pub points: usize,
    pub min: f64,
    pub min_position: f64,
    pub max: f64,
    /// x of the highest point.
    pub peak: f64,
    pub peak_height: f64,
    pub fwhm: f64,
    pub center_of_mass: f64,
}

impl CurveStatistics {
    pub fn compute(x: &[f64], y: &[f64]) -> Self {
        let pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(&x, &y)| (x, y))
            .collect();

        if pairs.is_empty() {
            return Self::default();
        }

        let (mut min_index, mut max_index) = (0, 0);
        for (i, &(_, y)) in pairs.iter().enumerate() {
            if y < pairs[min_index].1 {
                min_index = i;
            }
            if y > pairs[max_index].1 {
                max_index = i;
            }
        }

        let (min_position, min) = pairs[min_index];
        let (peak, peak_height) = pairs[max_index];

        let sum_y: f64 = pairs.iter().map(|(_, y)| y).sum();
        let sum_xy: f64 = pairs.iter().map(|(x, y)| x * y).sum();
        let center_of_mass = if sum_y != 0.0 && (sum_xy / sum_y).is_finite() {
            sum_xy / sum_y
        } else {
            peak
        };

        Self {
            points: pairs.len(),
            min,
            min_position,
            max: peak_height,
            peak,
            peak_height,
            fwhm: Self::full_width_half_max(&pairs, max_index, min),
            center_of_mass,
        }
    }

    /// Width between the half-maximum crossings on either side of the peak,
    /// measured above the curve minimum.
    fn full_width_half_max(pairs: &[(f64, f64)], max_index: usize, baseline: f64) -> f64 {
        let (x_min, x_max) = pairs
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(x, _)| {
                (lo.min(x), hi.max(x))
            });
        let fallback = (x_max - x_min) / 5.0;

        let half = baseline + 0.5 * (pairs[max_index].1 - baseline);
        if pairs[max_index].1 <= baseline {
            return fallback;
        }

        let crossing = |a: (f64, f64), b: (f64, f64)| {
            if b.1 == a.1 {
                a.0
            } else {
                a.0 + (half - a.1) * (b.0 - a.0) / (b.1 - a.1)
            }
        };

        let left = (1..=max_index)
            .rev()
            .find(|&i| pairs[i - 1].1 <= half)
            .map(|i| crossing(pairs[i - 1], pairs[i]));
        let right = (max_index..pairs.len() - 1)
            .find(|&i| pairs[i + 1].1 <= half)
            .map(|i| crossing(pairs[i], pairs[i + 1]));

        match (left, right) {
            (Some(l), Some(r)) => (r - l).abs(),
            (Some(l), None) => 2.0 * (pairs[max_index].0 - l).abs(),
            (None, Some(r)) => 2.0 * (r - pairs[max_index].0).abs(),
            (None, None) => fallback,
        }
    }
}
