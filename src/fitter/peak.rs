use std::f64::consts::{LN_2, PI};

use statrs::function::gamma::gamma;

use super::common::Value;
use super::engine::FitResult;
use super::models::FWHM_PER_SIGMA;

/// Physical quantities of a fitted peak, with uncertainties propagated from
/// the fit parameters in quadrature.
#[derive(PartialEq, Default, Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct PeakSummary {
    pub model: String,
    pub position: Value,
    /// Maximum above the background.
    pub height: Value,
    pub fwhm: Value,
    /// Gaussian-equivalent standard deviation, `fwhm / 2.3548`.
    pub sigma: Value,
    pub area: Value,
}

impl PeakSummary {
    /// Summary of a gaussian, lorentzian or super_gaussian fit; `None` for
    /// any other model.
    pub fn from_result(result: &FitResult) -> Option<Self> {
        let values = result.values();
        let summary = match result.model.as_str() {
            "gaussian" => Self::gaussian(&values)?,
            "lorentzian" => Self::lorentzian(&values)?,
            "super_gaussian" => Self::super_gaussian(&values)?,
            other => {
                log::debug!("No peak summary for model '{other}'");
                return None;
            }
        };

        if summary.fwhm.value < 0.0 {
            log::warn!("Peak of {} has a negative width", result.model);
        }
        Some(summary)
    }

    fn gaussian(values: &[Value]) -> Option<Self> {
        let (height, position, fwhm) = (*values.get(2)?, *values.get(3)?, *values.get(4)?);
        let sigma = Self::sigma_from_fwhm(fwhm);

        let two_pi_sqrt = (2.0 * PI).sqrt();
        let area = Value::new(
            height.value * sigma.value * two_pi_sqrt,
            ((sigma.value * two_pi_sqrt * height.uncertainty).powi(2)
                + (height.value * two_pi_sqrt * sigma.uncertainty).powi(2))
            .sqrt(),
        );

        Some(Self {
            model: "gaussian".to_owned(),
            position,
            height,
            fwhm,
            sigma,
            area,
        })
    }

    fn lorentzian(values: &[Value]) -> Option<Self> {
        let (amplitude, position, fwhm) = (*values.get(2)?, *values.get(3)?, *values.get(4)?);

        let height = Value::new(
            2.0 * amplitude.value / PI,
            2.0 * amplitude.uncertainty / PI,
        );
        let area = Value::new(
            amplitude.value * fwhm.value,
            ((fwhm.value * amplitude.uncertainty).powi(2)
                + (amplitude.value * fwhm.uncertainty).powi(2))
            .sqrt(),
        );

        Some(Self {
            model: "lorentzian".to_owned(),
            position,
            height,
            fwhm,
            sigma: Self::sigma_from_fwhm(fwhm),
            area,
        })
    }

    fn super_gaussian(values: &[Value]) -> Option<Self> {
        let (height, position, fwhm, shape) = (
            *values.get(2)?,
            *values.get(3)?,
            *values.get(4)?,
            *values.get(5)?,
        );
        if shape.value <= 0.0 {
            log::warn!("Super-gaussian shape {} has no finite area", shape.value);
            return None;
        }

        let shape_factor = |p: f64| gamma(1.0 + 1.0 / p) / LN_2.powf(1.0 / p);
        let factor = shape_factor(shape.value);

        let step = 1e-6 * shape.value;
        let d_factor =
            (shape_factor(shape.value + step) - shape_factor(shape.value - step)) / (2.0 * step);

        let area = Value::new(
            height.value * fwhm.value * factor,
            ((fwhm.value * factor * height.uncertainty).powi(2)
                + (height.value * factor * fwhm.uncertainty).powi(2)
                + (height.value * fwhm.value * d_factor * shape.uncertainty).powi(2))
            .sqrt(),
        );

        Some(Self {
            model: "super_gaussian".to_owned(),
            position,
            height,
            fwhm,
            sigma: Self::sigma_from_fwhm(fwhm),
            area,
        })
    }

    fn sigma_from_fwhm(fwhm: Value) -> Value {
        Value::new(fwhm.value / FWHM_PER_SIGMA, fwhm.uncertainty / FWHM_PER_SIGMA)
    }
}

impl std::fmt::Display for PeakSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "[[Peak]] {}", self.model)?;
        writeln!(f, "    position = {}", self.position)?;
        writeln!(f, "    height   = {}", self.height)?;
        writeln!(f, "    fwhm     = {}", self.fwhm)?;
        writeln!(f, "    sigma    = {}", self.sigma)?;
        write!(f, "    area     = {}", self.area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::constraints::Constraint;

    fn result(model: &str, parameters: Vec<f64>, uncertainties: Vec<f64>) -> FitResult {
        let count = parameters.len();
        FitResult {
            model: model.to_owned(),
            parameter_names: (0..count).map(|i| format!("p{i}")).collect(),
            parameters,
            uncertainties,
            constraints: vec![Constraint::Free; count],
            chi_square: 0.0,
            reduced_chi_square: 0.0,
            degrees_of_freedom: 10,
            points: 15,
            iterations: 3,
            last_delta_chi: 0.0,
            converged: true,
        }
    }

    #[test]
    fn test_gaussian_area() {
        let fwhm = FWHM_PER_SIGMA * 2.0;
        let summary = PeakSummary::from_result(&result(
            "gaussian",
            vec![1.0, 0.0, 10.0, 5.0, fwhm],
            vec![0.1, 0.0, 1.0, 0.05, 0.0],
        ))
        .unwrap();

        let expected = 10.0 * 2.0 * (2.0 * PI).sqrt();
        assert!((summary.sigma.value - 2.0).abs() < 1e-12);
        assert!((summary.area.value - expected).abs() < 1e-9);
        // only the height is uncertain: relative error carries over
        assert!((summary.area.uncertainty - 0.1 * expected).abs() < 1e-9);
        assert_eq!(summary.position, Value::new(5.0, 0.05));
    }

    #[test]
    fn test_lorentzian_height_and_area() {
        let summary = PeakSummary::from_result(&result(
            "lorentzian",
            vec![0.0, 0.0, PI, 2.0, 3.0],
            vec![0.0, 0.0, 0.0, 0.0, 0.3],
        ))
        .unwrap();
        assert!((summary.height.value - 2.0).abs() < 1e-12);
        assert!((summary.area.value - 3.0 * PI).abs() < 1e-12);
        assert!((summary.area.uncertainty - 0.3 * PI).abs() < 1e-12);
    }

    #[test]
    fn test_super_gaussian_with_shape_two_matches_gaussian() {
        let g = PeakSummary::from_result(&result(
            "gaussian",
            vec![0.0, 0.0, 4.0, 1.0, 2.5],
            vec![0.0; 5],
        ))
        .unwrap();
        let sg = PeakSummary::from_result(&result(
            "super_gaussian",
            vec![0.0, 0.0, 4.0, 1.0, 2.5, 2.0],
            vec![0.0; 6],
        ))
        .unwrap();
        assert!((g.area.value - sg.area.value).abs() < 1e-9);
    }

    #[test]
    fn test_other_models_have_no_summary() {
        assert!(PeakSummary::from_result(&result("linear", vec![1.0, 2.0], vec![0.0; 2])).is_none());
    }
}
