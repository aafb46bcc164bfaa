use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rayon::prelude::*;

use super::common::FitInput;
use super::constraints::{Constraint, ConstraintKind};
use super::engine::{FitOptions, FitResult, fit};
use super::models::ModelRegistry;
use super::statistics::CurveStatistics;
use crate::error::FitError;

/// Constraint kind as written in a legacy setup: numeric code or tag.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum LegacyKind {
    Code(i64),
    Tag(String),
}

/// A constraint as it appears in a request document.
///
/// Accepts the typed form (`{kind: factor, reference: 0, factor: 2.0}`), the
/// legacy triple (`{kind: FACTOR, first: 0, second: 2.0}`) or a bare tag
/// (`POSITIVE`).
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum ConstraintSpec {
    Typed(Constraint),
    Legacy {
        kind: LegacyKind,
        #[serde(default)]
        first: f64,
        #[serde(default)]
        second: f64,
    },
    Tag(String),
}

impl ConstraintSpec {
    pub fn resolve(&self, index: usize) -> Result<Constraint, FitError> {
        match self {
            Self::Typed(constraint) => Ok(*constraint),
            Self::Legacy {
                kind: LegacyKind::Code(code),
                first,
                second,
            } => Constraint::from_kind(index, ConstraintKind::from_code(*code)?, *first, *second),
            Self::Legacy {
                kind: LegacyKind::Tag(tag),
                first,
                second,
            } => Constraint::from_tag(index, tag, *first, *second),
            Self::Tag(tag) => Constraint::from_tag(index, tag, 0.0, 0.0),
        }
    }
}

impl From<Constraint> for ConstraintSpec {
    fn from(constraint: Constraint) -> Self {
        Self::Typed(constraint)
    }
}

/// One fit described as data: which model, which curve, where to start.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct FitRequest {
    /// Label used in logs and reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub model: String,
    pub data: FitInput,
    /// Starting parameters; estimated from the curve when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<Vec<f64>>,
    /// One per parameter; the model defaults when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<ConstraintSpec>>,
    #[serde(default)]
    pub options: FitOptions,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RequestDocument {
    Many(Vec<FitRequest>),
    One(FitRequest),
}

impl From<RequestDocument> for Vec<FitRequest> {
    fn from(document: RequestDocument) -> Self {
        match document {
            RequestDocument::Many(requests) => requests,
            RequestDocument::One(request) => vec![request],
        }
    }
}

impl FitRequest {
    pub fn new(model: &str, data: FitInput) -> Self {
        Self {
            name: None,
            model: model.to_owned(),
            data,
            initial: None,
            constraints: None,
            options: FitOptions::default(),
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.model)
    }

    /// Reads one request or a list of them from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let document: RequestDocument = match extension.as_deref() {
            Some("yaml" | "yml") => serde_yaml::from_reader(reader)?,
            Some("json") => serde_json::from_reader(reader)?,
            _ => {
                return Err(format!(
                    "unsupported request file '{}', expected .yaml, .yml or .json",
                    path.display()
                )
                .into());
            }
        };

        let requests: Vec<Self> = document.into();
        log::info!("Loaded {} fit request(s) from {}", requests.len(), path.display());
        Ok(requests)
    }

    pub fn from_yaml_str(text: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        serde_yaml::from_str::<RequestDocument>(text).map(Into::into)
    }

    pub fn from_json_str(text: &str) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_str::<RequestDocument>(text).map(Into::into)
    }

    /// Resolves the model and constraints against `registry` and fits.
    pub fn run(&self, registry: &ModelRegistry) -> Result<FitResult, FitError> {
        let model = registry.get(&self.model)?;

        let initial = match &self.initial {
            Some(initial) => initial.clone(),
            None => {
                let data = self.data.finite_points()?;
                let stats = CurveStatistics::compute(&data.x, &data.y);
                model.estimate_parameters(&data.x, &data.y, &stats)
            }
        };

        let constraints = match &self.constraints {
            Some(specs) => specs
                .iter()
                .enumerate()
                .map(|(index, spec)| spec.resolve(index))
                .collect::<Result<Vec<_>, _>>()?,
            None => model.default_constraints(),
        };

        log::debug!("Running fit '{}' with {} points", self.label(), self.data.len());
        fit(model.as_ref(), &initial, &constraints, &self.data, &self.options)
    }
}

/// Runs every request in parallel; results keep the order of `requests`.
pub fn fit_many(
    registry: &ModelRegistry,
    requests: &[FitRequest],
) -> Vec<Result<FitResult, FitError>> {
    requests
        .par_iter()
        .map(|request| request.run(registry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_spec_forms() {
        let specs: Vec<ConstraintSpec> = serde_yaml::from_str(
            "
- kind: factor
  reference: 0
  factor: 2.0
- kind: DELTA
  first: 1
  second: 0.5
- kind: 2
  first: 6.0
  second: 1.0
- positive
",
        )
        .unwrap();

        let resolved: Vec<Constraint> = specs
            .iter()
            .enumerate()
            .map(|(i, s)| s.resolve(i).unwrap())
            .collect();
        assert_eq!(
            resolved,
            vec![
                Constraint::Factor {
                    reference: 0,
                    factor: 2.0
                },
                Constraint::Delta {
                    reference: 1,
                    delta: 0.5
                },
                Constraint::Quoted { low: 6.0, high: 1.0 },
                Constraint::Positive,
            ]
        );
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let spec = ConstraintSpec::Tag("bounded".to_owned());
        assert!(matches!(
            spec.resolve(0),
            Err(FitError::UnknownConstraint(tag)) if tag == "bounded"
        ));
    }

    #[test]
    fn test_single_request_document() {
        let requests = FitRequest::from_json_str(
            r#"{"model": "linear", "data": {"x": [0, 1, 2], "y": [1, 3, 5]}}"#,
        )
        .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].label(), "linear");
        assert_eq!(requests[0].options.max_iterations, 100);

        let result = requests[0]
            .run(&ModelRegistry::with_builtin_models())
            .unwrap();
        assert!((result.parameters[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model() {
        let request = FitRequest::new("voigt", FitInput::new(vec![0.0; 5], vec![0.0; 5]));
        assert!(matches!(
            request.run(&ModelRegistry::with_builtin_models()),
            Err(FitError::UnknownModel(_))
        ));
    }
}
