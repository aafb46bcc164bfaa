use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;
use crate::fitter::common::{FitInput, Value};
use crate::fitter::constraints::{Constraint, ConstraintResolver};
use crate::fitter::models::FitModel;
use crate::fitter::statistics::CurveStatistics;

/// Minimum usable points for a non-linear fit.
pub const MIN_POINTS: usize = 3;

/// Relative finite-difference step.
const DERIVATIVE_STEP: f64 = 1e-5;

/// chi² below this fraction of `Σ w·y²` is treated as an exact fit.
const CHI_SQUARE_FLOOR: f64 = 1e-20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Sigma weighting when sigma is supplied, unit weights otherwise.
    #[default]
    Auto,
    Unit,
    /// `1/|y|`, counting statistics.
    Poisson,
    /// `1/σ²`.
    Sigma,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Relative chi² improvement below which the fit is converged.
    pub tolerance: f64,
    pub initial_lambda: f64,
    pub max_lambda: f64,
    pub weighting: Weighting,
    /// Use every other point on the first iteration of large data sets.
    pub subsample_first_iteration: bool,
    pub subsample_min_points: usize,
    pub use_analytic_derivatives: bool,
    /// Polled once per iteration; set it to abandon the fit.
    #[serde(skip)]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 0.01,
            initial_lambda: 0.001,
            max_lambda: 1000.0,
            weighting: Weighting::Auto,
            subsample_first_iteration: true,
            subsample_min_points: 100,
            use_analytic_derivatives: true,
            cancel: None,
        }
    }
}

impl FitOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FitResult {
    pub model: String,
    pub parameter_names: Vec<String>,
    /// Full parameter vector, derived parameters included.
    pub parameters: Vec<f64>,
    /// One standard error per parameter; zero for FIXED and IGNORED ones.
    pub uncertainties: Vec<f64>,
    pub constraints: Vec<Constraint>,
    pub chi_square: f64,
    pub reduced_chi_square: f64,
    pub degrees_of_freedom: usize,
    pub points: usize,
    pub iterations: usize,
    /// Relative chi² change of the last accepted step.
    pub last_delta_chi: f64,
    pub converged: bool,
}

impl FitResult {
    pub fn values(&self) -> Vec<Value> {
        self.parameters
            .iter()
            .zip(&self.uncertainties)
            .map(|(&value, &uncertainty)| Value::new(value, uncertainty))
            .collect()
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        let index = self.parameter_names.iter().position(|n| n == name)?;
        Some(Value::new(
            self.parameters[index],
            self.uncertainties[index],
        ))
    }

    /// Fitted curve at `x`, e.g. for an overlay line. `None` when `model`
    /// takes a different number of parameters than this result holds.
    pub fn evaluate(&self, model: &dyn FitModel, x: &[f64]) -> Option<Vec<f64>> {
        if model.parameter_count() != self.parameters.len() {
            log::warn!(
                "Cannot evaluate a {} result ({} parameters) with model {} ({} parameters)",
                self.model,
                self.parameters.len(),
                model.name(),
                model.parameter_count()
            );
            return None;
        }
        Some(model.evaluate(&self.parameters, x))
    }

    /// `num_points` evenly spaced `[x, y]` pairs over `[start, end]`.
    pub fn fit_line_points(
        &self,
        model: &dyn FitModel,
        start: f64,
        end: f64,
        num_points: usize,
    ) -> Option<Vec<[f64; 2]>> {
        let num_points = num_points.max(2);
        let step = (end - start) / (num_points - 1) as f64;
        let x: Vec<f64> = (0..num_points).map(|i| start + step * i as f64).collect();
        let y = self.evaluate(model, &x)?;
        Some(x.into_iter().zip(y).map(|(x, y)| [x, y]).collect())
    }

    pub fn report(&self) -> String {
        let mut report = format!(
            "[[Model]] {}\n[[Fit Statistics]]\n    data points    = {}\n    iterations     = {}\n    chi-square     = {:.6e}\n    reduced chi-sq = {:.6e}\n    converged      = {}\n[[Variables]]\n",
            self.model,
            self.points,
            self.iterations,
            self.chi_square,
            self.reduced_chi_square,
            self.converged,
        );
        for ((name, value), constraint) in self
            .parameter_names
            .iter()
            .zip(self.values())
            .zip(&self.constraints)
        {
            report.push_str(&format!(
                "    {name:<12} = {:>14.6e} ± {:<12.4e} ({})\n",
                value.value,
                value.uncertainty,
                constraint.kind()
            ));
        }
        report
    }
}

/// Points and weights the chi² is evaluated over.
struct Problem<'a> {
    model: &'a dyn FitModel,
    x: Vec<f64>,
    y: Vec<f64>,
    weights: Vec<f64>,
}

impl<'a> Problem<'a> {
    fn new(model: &'a dyn FitModel, input: &FitInput, weighting: Weighting) -> Self {
        let guarded = |v: f64| 1.0 / (v.abs() + if v == 0.0 { 1.0 } else { 0.0 });

        let weighting = match (weighting, &input.sigma) {
            (Weighting::Auto, Some(_)) => Weighting::Sigma,
            (Weighting::Auto, None) => Weighting::Unit,
            (Weighting::Sigma, None) => {
                log::warn!("Sigma weighting requested without sigma values, using unit weights");
                Weighting::Unit
            }
            (other, _) => other,
        };

        let weights = match (weighting, &input.sigma) {
            (Weighting::Sigma, Some(sigma)) => sigma.iter().map(|s| guarded(s * s)).collect(),
            (Weighting::Poisson, _) => input.y.iter().map(|&y| guarded(y)).collect(),
            _ => vec![1.0; input.y.len()],
        };

        Self {
            model,
            x: input.x.clone(),
            y: input.y.clone(),
            weights,
        }
    }

    fn every_other(&self) -> Self {
        let half = |values: &[f64]| values.iter().step_by(2).copied().collect::<Vec<f64>>();
        Self {
            model: self.model,
            x: half(&self.x),
            y: half(&self.y),
            weights: half(&self.weights),
        }
    }

    fn len(&self) -> usize {
        self.x.len()
    }

    fn chi_square(&self, full: &[f64]) -> f64 {
        self.model
            .evaluate(full, &self.x)
            .iter()
            .zip(&self.y)
            .zip(&self.weights)
            .map(|((f, y), w)| w * (y - f) * (y - f))
            .sum()
    }

    /// chi² at or below which no further improvement is meaningful.
    fn chi_square_floor(&self) -> f64 {
        let scale: f64 = self
            .y
            .iter()
            .zip(&self.weights)
            .map(|(y, w)| w * y * y)
            .sum();
        CHI_SQUARE_FLOOR * scale
    }

    /// `∂f/∂reduced_j` in value space, one column per free parameter.
    fn jacobian(&self, resolver: &ConstraintResolver, reduced: &[f64], analytic: bool) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.len(), reduced.len());
        let full = resolver.to_full(reduced);

        for position in 0..reduced.len() {
            let column = analytic
                .then(|| self.analytic_column(resolver, &full, reduced, position))
                .flatten()
                .unwrap_or_else(|| self.numeric_column(resolver, reduced, position));
            jacobian.set_column(position, &DVector::from_vec(column));
        }
        jacobian
    }

    /// Model derivatives chained through derived parameters, or `None` when
    /// the model lacks one of the needed partials.
    fn analytic_column(
        &self,
        resolver: &ConstraintResolver,
        full: &[f64],
        reduced: &[f64],
        position: usize,
    ) -> Option<Vec<f64>> {
        let tangent = resolver.tangent(position, reduced);
        let mut column = vec![0.0; self.len()];
        for (index, &weight) in tangent.iter().enumerate() {
            if weight == 0.0 {
                continue;
            }
            let partial = self.model.derivative(full, index, &self.x)?;
            for (c, p) in column.iter_mut().zip(partial) {
                *c += weight * p;
            }
        }
        Some(column)
    }

    fn numeric_column(&self, resolver: &ConstraintResolver, reduced: &[f64], position: usize) -> Vec<f64> {
        let value = reduced[position];
        let step = if value == 0.0 {
            DERIVATIVE_STEP
        } else {
            DERIVATIVE_STEP * value.abs()
        };

        let mut shifted = reduced.to_vec();
        shifted[position] = value + step;
        let up = self.model.evaluate(&resolver.to_full(&shifted), &self.x);
        shifted[position] = value - step;
        let down = self.model.evaluate(&resolver.to_full(&shifted), &self.x);

        up.iter()
            .zip(&down)
            .map(|(u, d)| (u - d) / (2.0 * step))
            .collect()
    }

    fn residuals(&self, full: &[f64]) -> Vec<f64> {
        self.model
            .evaluate(full, &self.x)
            .iter()
            .zip(&self.y)
            .map(|(f, y)| y - f)
            .collect()
    }

    /// `alpha = Jᵀ·W·J`, `beta = Jᵀ·W·r`.
    fn normal_equations(&self, jacobian: &DMatrix<f64>, residuals: &[f64]) -> (DMatrix<f64>, DVector<f64>) {
        let weighted_residuals = DVector::from_iterator(
            self.len(),
            residuals.iter().zip(&self.weights).map(|(r, w)| w * r),
        );
        let mut weighted_jacobian = jacobian.clone();
        for (i, mut row) in weighted_jacobian.row_iter_mut().enumerate() {
            row *= self.weights[i];
        }
        let alpha = jacobian.transpose() * weighted_jacobian;
        let beta = jacobian.transpose() * weighted_residuals;
        (alpha, beta)
    }
}

/// Quoted bounds as centre and half-width.
fn quoted_transform(constraint: Constraint) -> Option<(f64, f64)> {
    match constraint {
        Constraint::Quoted { low, high } => Some((0.5 * (high + low), 0.5 * (high - low))),
        _ => None,
    }
}

fn quoted_angle(value: f64, centre: f64, half_width: f64) -> f64 {
    ((value - centre) / half_width).clamp(-1.0, 1.0).asin()
}

/// Rescales QUOTED columns so the solver steps in the sine angle.
fn to_angle_space(jacobian: &mut DMatrix<f64>, resolver: &ConstraintResolver, reduced: &[f64]) {
    for (position, &index) in resolver.free_indices().iter().enumerate() {
        if let Some((centre, half_width)) = quoted_transform(resolver.constraints()[index]) {
            let theta = quoted_angle(reduced[position], centre, half_width);
            let scale = half_width * theta.cos();
            let mut column = jacobian.column_mut(position);
            column *= scale;
        }
    }
}

fn apply_step(resolver: &ConstraintResolver, reduced: &[f64], delta: &DVector<f64>) -> Vec<f64> {
    resolver
        .free_indices()
        .iter()
        .zip(reduced)
        .zip(delta.iter())
        .map(|((&index, &value), &step)| {
            match quoted_transform(resolver.constraints()[index]) {
                Some((centre, half_width)) => {
                    centre + half_width * (quoted_angle(value, centre, half_width) + step).sin()
                }
                None => value + step,
            }
        })
        .collect()
}

/// Standard errors from the diagonal of the inverse curvature matrix.
fn standard_errors(alpha: DMatrix<f64>) -> Option<Vec<f64>> {
    let covariance = alpha.try_inverse()?;
    Some(covariance.diagonal().iter().map(|v| v.abs().sqrt()).collect())
}

struct Outcome<'r> {
    resolver: &'r ConstraintResolver,
    reduced: Vec<f64>,
    chi_square: f64,
    points: usize,
    iterations: usize,
    last_delta_chi: f64,
    converged: bool,
}

impl Outcome<'_> {
    fn into_result(self, model: &dyn FitModel, sigma_free: &[f64]) -> FitResult {
        let free = self.reduced.len();
        let degrees_of_freedom = self.points.saturating_sub(free);
        let reduced_chi_square = if degrees_of_freedom > 0 {
            self.chi_square / degrees_of_freedom as f64
        } else {
            self.chi_square
        };

        FitResult {
            model: model.name().to_owned(),
            parameter_names: model.parameter_names(),
            parameters: self.resolver.to_full(&self.reduced),
            uncertainties: self.resolver.sigma_full(sigma_free),
            constraints: self.resolver.constraints().to_vec(),
            chi_square: self.chi_square,
            reduced_chi_square,
            degrees_of_freedom,
            points: self.points,
            iterations: self.iterations,
            last_delta_chi: self.last_delta_chi,
            converged: self.converged,
        }
    }
}

/// Fits `model` to `input`, starting from `initial` under `constraints`.
///
/// Models declaring themselves linear are solved directly; every other model
/// goes through a damped Gauss-Newton (Levenberg-Marquardt) iteration.
pub fn fit(
    model: &dyn FitModel,
    initial: &[f64],
    constraints: &[Constraint],
    input: &FitInput,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    if initial.len() != model.parameter_count() {
        return Err(FitError::ParameterCount {
            expected: model.parameter_count(),
            found: initial.len(),
        });
    }
    let resolver = ConstraintResolver::new(constraints, initial)?;
    let data = input.finite_points()?;

    let free = resolver.free_indices().len();
    let required = if model.is_linear() {
        free.max(2)
    } else {
        MIN_POINTS
    };
    if data.len() < required {
        return Err(FitError::InsufficientData {
            found: data.len(),
            required,
        });
    }
    if free == 0 {
        return Err(FitError::SingularMatrix { iteration: 0 });
    }

    let problem = Problem::new(model, &data, options.weighting);
    if model.is_linear() {
        fit_linear(&problem, resolver)
    } else {
        fit_nonlinear(&problem, &resolver, options)
    }
}

/// Fits with parameters estimated from the curve and the model's default constraints.
pub fn fit_with_estimate(
    model: &dyn FitModel,
    input: &FitInput,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let data = input.finite_points()?;
    let stats = CurveStatistics::compute(&data.x, &data.y);
    let initial = model.estimate_parameters(&data.x, &data.y, &stats);
    log::debug!("Estimated {} parameters: {initial:?}", model.name());
    fit(model, &initial, &model.default_constraints(), &data, options)
}

fn fit_linear(problem: &Problem<'_>, mut resolver: ConstraintResolver) -> Result<FitResult, FitError> {
    let mut round = 0;
    loop {
        round += 1;
        let free = resolver.free_indices().len();
        if free == 0 {
            // every parameter ended up pinned at a constraint limit
            let chi_square = problem.chi_square(&resolver.to_full(&[]));
            let outcome = Outcome {
                resolver: &resolver,
                reduced: Vec::new(),
                chi_square,
                points: problem.len(),
                iterations: round - 1,
                last_delta_chi: 0.0,
                converged: true,
            };
            return Ok(outcome.into_result(problem.model, &[]));
        }

        // exact Jacobian: the model and the constraints are linear
        let zero = vec![0.0; free];
        let offset = problem.model.evaluate(&resolver.to_full(&zero), &problem.x);
        let mut jacobian = DMatrix::zeros(problem.len(), free);
        for position in 0..free {
            let mut unit = zero.clone();
            unit[position] = 1.0;
            let column = problem.model.evaluate(&resolver.to_full(&unit), &problem.x);
            for (row, (c, o)) in column.iter().zip(&offset).enumerate() {
                jacobian[(row, position)] = c - o;
            }
        }

        let residuals: Vec<f64> = problem.y.iter().zip(&offset).map(|(y, o)| y - o).collect();
        let (alpha, beta) = problem.normal_equations(&jacobian, &residuals);

        let covariance = alpha
            .try_inverse()
            .ok_or(FitError::SingularMatrix { iteration: round })?;
        let solution = &covariance * beta;

        let mut pinned = None;
        for (position, &index) in resolver.free_indices().iter().enumerate() {
            let value = solution[position];
            let limit = match resolver.constraints()[index] {
                Constraint::Positive if value < 0.0 => Some(0.0),
                Constraint::Quoted { low, high } if value < low || value > high => {
                    Some(value.clamp(low, high))
                }
                _ => None,
            };
            if let Some(limit) = limit {
                pinned = Some((index, value, limit));
                break;
            }
        }

        if let Some((index, value, limit)) = pinned {
            log::warn!("Parameter {index} solved to {value}, fixing it at {limit}");
            resolver = resolver.with_fixed(index, limit)?;
            continue;
        }

        let reduced: Vec<f64> = solution.iter().copied().collect();
        let chi_square = problem.chi_square(&resolver.to_full(&reduced));
        let sigma_free: Vec<f64> = covariance
            .diagonal()
            .iter()
            .map(|v| v.abs().sqrt())
            .collect();

        log::info!(
            "Linear fit of {} converged in {round} solve(s), chi² = {chi_square:.6e}",
            problem.model.name()
        );

        let outcome = Outcome {
            resolver: &resolver,
            reduced,
            chi_square,
            points: problem.len(),
            iterations: round,
            last_delta_chi: 0.0,
            converged: true,
        };
        return Ok(outcome.into_result(problem.model, &sigma_free));
    }
}

fn fit_nonlinear(
    problem: &Problem<'_>,
    resolver: &ConstraintResolver,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let free = resolver.free_indices().len();
    let subsampled = (options.subsample_first_iteration
        && problem.len() > 3 * free
        && problem.len() > options.subsample_min_points)
        .then(|| problem.every_other());

    let floor = problem.chi_square_floor();
    let mut reduced = resolver.initial_reduced();
    let mut chi_square = problem.chi_square(&resolver.to_full(&reduced));
    let mut lambda = options.initial_lambda;
    let mut last_delta_chi = 0.0;
    let mut iterations = 0;
    let mut converged = false;
    let mut failure = None;

    for iteration in 1..=options.max_iterations {
        if options.is_cancelled() {
            return Err(FitError::Cancelled { iteration });
        }
        if chi_square <= floor {
            converged = true;
            break;
        }
        iterations = iteration;

        let (current, subsampling) = match (&subsampled, iteration) {
            (Some(half), 1) => (half, true),
            _ => (problem, false),
        };
        let chi_square_before = if subsampling {
            current.chi_square(&resolver.to_full(&reduced))
        } else {
            chi_square
        };

        let mut jacobian = current.jacobian(resolver, &reduced, options.use_analytic_derivatives);
        to_angle_space(&mut jacobian, resolver, &reduced);
        let (alpha, beta) = current.normal_equations(&jacobian, &current.residuals(&resolver.to_full(&reduced)));

        let accepted = loop {
            let mut damped = alpha.clone();
            for i in 0..free {
                let diagonal = alpha[(i, i)];
                damped[(i, i)] = if diagonal == 0.0 {
                    1.0
                } else {
                    diagonal * (1.0 + lambda)
                };
            }
            let delta = damped
                .lu()
                .solve(&beta)
                .ok_or(FitError::SingularMatrix { iteration })?;

            let candidate = apply_step(resolver, &reduced, &delta);
            let candidate_chi = current.chi_square(&resolver.to_full(&candidate));

            let worse = !candidate_chi.is_finite()
                || (chi_square_before.is_finite() && candidate_chi > chi_square_before);
            if worse {
                lambda *= 10.0;
                if lambda > options.max_lambda {
                    break None;
                }
                continue;
            }
            lambda /= 10.0;
            break Some((candidate, candidate_chi));
        };

        let Some((candidate, candidate_chi)) = accepted else {
            failure = Some(format!(
                "damping factor exceeded {} without improving chi²",
                options.max_lambda
            ));
            break;
        };
        reduced = candidate;

        if subsampling {
            chi_square = problem.chi_square(&resolver.to_full(&reduced));
            log::debug!("Iteration {iteration} (every other point): chi² = {chi_square:.6e}, λ = {lambda:.1e}");
            continue;
        }

        let denominator = chi_square_before + if chi_square_before == 0.0 { 1.0 } else { 0.0 };
        last_delta_chi = (chi_square_before - candidate_chi) / denominator;
        chi_square = candidate_chi;
        log::debug!(
            "Iteration {iteration}: chi² = {chi_square:.6e}, Δχ²/χ² = {last_delta_chi:.3e}, λ = {lambda:.1e}"
        );

        if last_delta_chi < options.tolerance || chi_square <= floor {
            converged = true;
            break;
        }
    }

    let jacobian = problem.jacobian(resolver, &reduced, options.use_analytic_derivatives);
    let (alpha, _) = problem.normal_equations(&jacobian, &problem.residuals(&resolver.to_full(&reduced)));
    let sigma_free = standard_errors(alpha);

    let outcome = Outcome {
        resolver,
        reduced,
        chi_square,
        points: problem.len(),
        iterations,
        last_delta_chi,
        converged,
    };

    if !converged {
        let reason = failure.unwrap_or_else(|| {
            format!(
                "iteration budget of {} exhausted (last Δχ²/χ² = {last_delta_chi:.3e})",
                options.max_iterations
            )
        });
        log::warn!("Fit of {} did not converge: {reason}", problem.model.name());
        let sigma_free = sigma_free.unwrap_or_else(|| vec![f64::NAN; free]);
        return Err(FitError::NonConvergence {
            iteration: iterations,
            reason,
            partial: Box::new(outcome.into_result(problem.model, &sigma_free)),
        });
    }

    let sigma_free = sigma_free.ok_or(FitError::SingularMatrix {
        iteration: iterations,
    })?;

    log::info!(
        "Fit of {} converged after {iterations} iterations, chi² = {:.6e}",
        problem.model.name(),
        outcome.chi_square
    );
    Ok(outcome.into_result(problem.model, &sigma_free))
}
