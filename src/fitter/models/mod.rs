pub mod gaussian;
pub mod hill;
pub mod linear;
pub mod lorentzian;
pub mod super_gaussian;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::FitError;
use crate::fitter::common::tail_means;
use crate::fitter::constraints::Constraint;
use crate::fitter::statistics::CurveStatistics;

pub use gaussian::GaussianModel;
pub use hill::HillModel;
pub use linear::LinearModel;
pub use lorentzian::LorentzianModel;
pub use super_gaussian::SuperGaussianModel;

/// 2·sqrt(2·ln 2): FWHM of a Gaussian in units of its standard deviation.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// A function family the least-squares engine can fit.
pub trait FitModel: Send + Sync {
    fn name(&self) -> &str;

    fn parameter_names(&self) -> Vec<String>;

    /// Model value at every `x`. Must be pure.
    fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64>;

    /// Starting point for a fit of `(x, y)`.
    fn estimate_parameters(&self, x: &[f64], y: &[f64], stats: &CurveStatistics) -> Vec<f64>;

    fn parameter_count(&self) -> usize {
        self.parameter_names().len()
    }

    fn default_constraints(&self) -> Vec<Constraint> {
        vec![Constraint::Free; self.parameter_count()]
    }

    /// True when the model is linear in all of its parameters, which lets
    /// the engine solve it in one step.
    fn is_linear(&self) -> bool {
        false
    }

    /// Analytic `∂f/∂params[index]` at every `x`, when the model has one.
    fn derivative(&self, _params: &[f64], _index: usize, _x: &[f64]) -> Option<Vec<f64>> {
        None
    }
}

/// `exp(x)` that returns 0 instead of over/underflowing for `|x| >= 250`.
pub fn guarded_exp(x: f64) -> f64 {
    if x.abs() < 250.0 { x.exp() } else { 0.0 }
}

/// Flat background level from the mean of both curve tails.
pub(crate) fn flat_background(x: &[f64], y: &[f64]) -> f64 {
    let ((_, first), (_, last)) = tail_means(x, y);
    0.5 * (first + last)
}

type EvaluateFn = dyn Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync;
type EstimateFn = dyn Fn(&[f64], &[f64], &CurveStatistics) -> Vec<f64> + Send + Sync;

/// Model built from an evaluate/estimate closure pair.
pub struct CustomModel {
    name: String,
    parameter_names: Vec<String>,
    evaluate: Box<EvaluateFn>,
    estimate: Box<EstimateFn>,
    linear: bool,
}

impl CustomModel {
    pub fn new<E, G>(name: &str, parameter_names: &[&str], evaluate: E, estimate: G) -> Self
    where
        E: Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync + 'static,
        G: Fn(&[f64], &[f64], &CurveStatistics) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            parameter_names: parameter_names.iter().map(|&n| n.to_owned()).collect(),
            evaluate: Box::new(evaluate),
            estimate: Box::new(estimate),
            linear: false,
        }
    }

    /// Mark the model as linear in its parameters.
    pub fn linear(mut self) -> Self {
        self.linear = true;
        self
    }
}

impl std::fmt::Debug for CustomModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomModel")
            .field("name", &self.name)
            .field("parameter_names", &self.parameter_names)
            .field("linear", &self.linear)
            .finish_non_exhaustive()
    }
}

impl FitModel for CustomModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameter_names.clone()
    }

    fn evaluate(&self, params: &[f64], x: &[f64]) -> Vec<f64> {
        (self.evaluate)(params, x)
    }

    fn estimate_parameters(&self, x: &[f64], y: &[f64], stats: &CurveStatistics) -> Vec<f64> {
        (self.estimate)(x, y, stats)
    }

    fn is_linear(&self) -> bool {
        self.linear
    }
}

/// Models available to fit requests, looked up by name.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<dyn FitModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_models() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GaussianModel));
        registry.register(Arc::new(LorentzianModel));
        registry.register(Arc::new(LinearModel));
        registry.register(Arc::new(HillModel));
        registry.register(Arc::new(SuperGaussianModel));
        registry
    }

    /// Adds a model, replacing any model registered under the same name.
    pub fn register(&mut self, model: Arc<dyn FitModel>) {
        let name = model.name().to_owned();
        if self.models.insert(name.clone(), model).is_some() {
            log::warn!("Replacing fit model '{name}'");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FitModel>, FitError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| FitError::UnknownModel(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.models.keys()).finish()
    }
}
