pub mod common;
pub mod constraints;
pub mod engine;
pub mod models;
pub mod peak;
pub mod request;
pub mod statistics;

pub use common::{FitInput, Value};
pub use constraints::{Constraint, ConstraintKind, ConstraintResolver};
pub use engine::{FitOptions, FitResult, Weighting, fit, fit_with_estimate};
pub use models::{CustomModel, FitModel, ModelRegistry};
pub use peak::PeakSummary;
pub use request::{ConstraintSpec, FitRequest, fit_many};
pub use statistics::CurveStatistics;
