#![warn(clippy::all, rust_2018_idioms)]

//! Numerical core of the splot scan plotter: a constrained
//! Levenberg-Marquardt fitter with its peak and step models, curve
//! statistics, and axis tick placement.

pub mod error;
pub mod fitter;
pub mod ticks;

pub use error::FitError;
pub use fitter::{
    Constraint, FitInput, FitModel, FitOptions, FitRequest, FitResult, ModelRegistry, fit,
};
pub use ticks::{TickSet, calc_linear_ticks, calc_log_ticks, calc_symlog_ticks, nice_number};
