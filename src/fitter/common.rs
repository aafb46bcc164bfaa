use crate::error::FitError;

/// One curve to fit: abscissa, ordinate and optional per-point uncertainty.
#[derive(PartialEq, Default, Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct FitInput {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<Vec<f64>>,
}

impl FitInput {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { x, y, sigma: None }
    }

    pub fn with_sigma(mut self, sigma: Vec<f64>) -> Self {
        self.sigma = Some(sigma);
        self
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn check_lengths(&self) -> Result<(), FitError> {
        let sigma_len = self.sigma.as_ref().map(Vec::len);
        if self.x.len() != self.y.len() || sigma_len.is_some_and(|n| n != self.x.len()) {
            return Err(FitError::LengthMismatch {
                x: self.x.len(),
                y: self.y.len(),
                sigma: sigma_len,
            });
        }
        Ok(())
    }

    /// Copy of the input without points whose x, y or sigma is NaN/Inf.
    pub fn finite_points(&self) -> Result<Self, FitError> {
        self.check_lengths()?;

        let keep: Vec<bool> = (0..self.x.len())
            .map(|i| {
                self.x[i].is_finite()
                    && self.y[i].is_finite()
                    && self.sigma.as_ref().is_none_or(|s| s[i].is_finite())
            })
            .collect();

        let filter = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .zip(&keep)
                .filter_map(|(&v, &k)| k.then_some(v))
                .collect()
        };

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped > 0 {
            log::debug!("Dropping {dropped} non-finite points before fitting");
        }

        Ok(Self {
            x: filter(&self.x),
            y: filter(&self.y),
            sigma: self.sigma.as_deref().map(filter),
        })
    }
}

#[derive(PartialEq, Default, Debug, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub struct Value {
    pub value: f64,
    pub uncertainty: f64,
}

impl Value {
    pub fn new(value: f64, uncertainty: f64) -> Self {
        Self { value, uncertainty }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4} ± {:.4}", self.value, self.uncertainty)
    }
}

/// Number of points averaged at each end of a curve when guessing a background.
pub fn tail_length(len: usize) -> usize {
    if len > 12 {
        5
    } else if len >= 4 {
        2
    } else {
        1
    }
}

/// Mean `(x, y)` of the first and last few points.
pub fn tail_means(x: &[f64], y: &[f64]) -> ((f64, f64), (f64, f64)) {
    let len = x.len().min(y.len());
    if len == 0 {
        return ((0.0, 0.0), (0.0, 0.0));
    }
    let n = tail_length(len);
    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;

    let first = (mean(&x[..n]), mean(&y[..n]));
    let last = (mean(&x[len - n..len]), mean(&y[len - n..len]));
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_points_drops_nan_and_inf() {
        let input = FitInput::new(
            vec![0.0, 1.0, f64::NAN, 3.0, 4.0],
            vec![1.0, f64::INFINITY, 2.0, 3.0, 4.0],
        );
        let clean = input.finite_points().unwrap();
        assert_eq!(clean.x, vec![0.0, 3.0, 4.0]);
        assert_eq!(clean.y, vec![1.0, 3.0, 4.0]);
    }

    #[test]
    fn test_length_mismatch_is_reported() {
        let input = FitInput::new(vec![0.0, 1.0], vec![1.0]);
        assert!(matches!(
            input.finite_points(),
            Err(FitError::LengthMismatch { x: 2, y: 1, .. })
        ));
    }

    #[test]
    fn test_tail_means_uses_five_points_for_long_curves() {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let y = x.clone();
        let ((x0, y0), (x1, y1)) = tail_means(&x, &y);
        assert!((x0 - 2.0).abs() < 1e-12);
        assert!((y0 - 2.0).abs() < 1e-12);
        assert!((x1 - 17.0).abs() < 1e-12);
        assert!((y1 - 17.0).abs() < 1e-12);
    }

    #[test]
    fn test_tail_length_thresholds() {
        assert_eq!(tail_length(13), 5);
        assert_eq!(tail_length(12), 2);
        assert_eq!(tail_length(4), 2);
        assert_eq!(tail_length(3), 1);
    }
}
