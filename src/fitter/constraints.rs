use std::fmt::Display;
use std::str::FromStr;

use crate::error::FitError;

/// Constraint family of a parameter, without its operands.
///
/// The numeric codes match the legacy fit-setup files (0 = free ... 7 = ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    Free,
    Positive,
    Quoted,
    Fixed,
    Factor,
    Delta,
    Sum,
    Ignored,
}

impl ConstraintKind {
    pub const ALL: [Self; 8] = [
        Self::Free,
        Self::Positive,
        Self::Quoted,
        Self::Fixed,
        Self::Factor,
        Self::Delta,
        Self::Sum,
        Self::Ignored,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Positive => 1,
            Self::Quoted => 2,
            Self::Fixed => 3,
            Self::Factor => 4,
            Self::Delta => 5,
            Self::Sum => 6,
            Self::Ignored => 7,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, FitError> {
        Self::ALL
            .into_iter()
            .find(|kind| i64::from(kind.code()) == code)
            .ok_or_else(|| FitError::UnknownConstraint(code.to_string()))
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Positive => "POSITIVE",
            Self::Quoted => "QUOTED",
            Self::Fixed => "FIXED",
            Self::Factor => "FACTOR",
            Self::Delta => "DELTA",
            Self::Sum => "SUM",
            Self::Ignored => "IGNORED",
        }
    }

    /// Kinds the solver varies directly.
    pub fn is_free(self) -> bool {
        matches!(self, Self::Free | Self::Positive | Self::Quoted)
    }
}

impl FromStr for ConstraintKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| FitError::UnknownConstraint(trimmed.to_owned()))
    }
}

impl Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Constraint on a single parameter, with its operands.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    #[default]
    Free,
    Positive,
    /// Value kept inside `[low, high]`.
    Quoted { low: f64, high: f64 },
    Fixed,
    /// `value = factor * params[reference]`
    Factor { reference: usize, factor: f64 },
    /// `value = delta + params[reference]`
    Delta { reference: usize, delta: f64 },
    /// `value = sum - params[reference]`
    Sum { reference: usize, sum: f64 },
    /// Always zero.
    Ignored,
}

impl Constraint {
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Self::Free => ConstraintKind::Free,
            Self::Positive => ConstraintKind::Positive,
            Self::Quoted { .. } => ConstraintKind::Quoted,
            Self::Fixed => ConstraintKind::Fixed,
            Self::Factor { .. } => ConstraintKind::Factor,
            Self::Delta { .. } => ConstraintKind::Delta,
            Self::Sum { .. } => ConstraintKind::Sum,
            Self::Ignored => ConstraintKind::Ignored,
        }
    }

    pub fn reference(&self) -> Option<usize> {
        match *self {
            Self::Factor { reference, .. }
            | Self::Delta { reference, .. }
            | Self::Sum { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// Builds a constraint from the legacy `(kind, first, second)` triple, where
    /// `first`/`second` are the bounds for QUOTED and the reference index and
    /// operand for FACTOR/DELTA/SUM.
    pub fn from_tag(index: usize, tag: &str, first: f64, second: f64) -> Result<Self, FitError> {
        let kind: ConstraintKind = tag.parse()?;
        Self::from_kind(index, kind, first, second)
    }

    pub fn from_kind(
        index: usize,
        kind: ConstraintKind,
        first: f64,
        second: f64,
    ) -> Result<Self, FitError> {
        let reference = || {
            if first >= 0.0 && first.fract() == 0.0 && first.is_finite() {
                Ok(first as usize)
            } else {
                Err(FitError::InvalidConstraint {
                    index,
                    reason: format!("{kind} reference '{first}' is not a parameter index"),
                })
            }
        };

        Ok(match kind {
            ConstraintKind::Free => Self::Free,
            ConstraintKind::Positive => Self::Positive,
            ConstraintKind::Quoted => Self::Quoted {
                low: first,
                high: second,
            },
            ConstraintKind::Fixed => Self::Fixed,
            ConstraintKind::Factor => Self::Factor {
                reference: reference()?,
                factor: second,
            },
            ConstraintKind::Delta => Self::Delta {
                reference: reference()?,
                delta: second,
            },
            ConstraintKind::Sum => Self::Sum {
                reference: reference()?,
                sum: second,
            },
            ConstraintKind::Ignored => Self::Ignored,
        })
    }
}

/// Maps between the full parameter vector and the reduced vector of
/// parameters the solver actually varies.
#[derive(Debug, Clone)]
pub struct ConstraintResolver {
    constraints: Vec<Constraint>,
    values: Vec<f64>,
    free: Vec<usize>,
    /// FACTOR/DELTA/SUM/IGNORED indices, references before dependents.
    derived_order: Vec<usize>,
}

impl ConstraintResolver {
    /// `values` supplies the value of FIXED parameters and the starting point
    /// of the free ones.
    pub fn new(constraints: &[Constraint], values: &[f64]) -> Result<Self, FitError> {
        if constraints.len() != values.len() {
            return Err(FitError::ParameterCount {
                expected: values.len(),
                found: constraints.len(),
            });
        }

        let mut constraints = constraints.to_vec();
        for (index, constraint) in constraints.iter_mut().enumerate() {
            if let Constraint::Quoted { low, high } = constraint {
                if !low.is_finite() || !high.is_finite() || *low == *high {
                    return Err(FitError::InvalidConstraint {
                        index,
                        reason: format!("quoted range [{low}, {high}] is empty or unbounded"),
                    });
                }
                if *low > *high {
                    std::mem::swap(low, high);
                }
            }
            if let Some(reference) = constraint.reference() {
                if reference >= values.len() {
                    return Err(FitError::InvalidConstraint {
                        index,
                        reason: format!("reference {reference} is out of range"),
                    });
                }
                if reference == index {
                    return Err(FitError::InvalidConstraint {
                        index,
                        reason: "parameter references itself".to_owned(),
                    });
                }
            }
        }

        let free = constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind().is_free())
            .map(|(i, _)| i)
            .collect();
        let derived_order = Self::resolution_order(&constraints)?;

        Ok(Self {
            constraints,
            values: values.to_vec(),
            free,
            derived_order,
        })
    }

    /// Depth-first ordering of the derived parameters; fails on reference cycles.
    fn resolution_order(constraints: &[Constraint]) -> Result<Vec<usize>, FitError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; constraints.len()];
        let mut order = Vec::new();

        for start in 0..constraints.len() {
            if marks[start] != Mark::Unvisited || constraints[start].kind().is_free() {
                continue;
            }
            // walk the reference chain, then resolve it back to front
            let mut chain = Vec::new();
            let mut current = Some(start);
            while let Some(index) = current {
                match marks[index] {
                    Mark::Done => break,
                    Mark::InProgress => {
                        return Err(FitError::InvalidConstraint {
                            index: start,
                            reason: format!("reference cycle through parameter {index}"),
                        });
                    }
                    Mark::Unvisited => {}
                }
                marks[index] = Mark::InProgress;
                chain.push(index);
                current = constraints[index].reference();
            }
            for &index in chain.iter().rev() {
                marks[index] = Mark::Done;
                if !matches!(
                    constraints[index],
                    Constraint::Free | Constraint::Positive | Constraint::Quoted { .. } | Constraint::Fixed
                ) {
                    order.push(index);
                }
            }
        }

        Ok(order)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Indices of FREE, POSITIVE and QUOTED parameters, in order.
    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    /// Starting reduced vector: POSITIVE folded to `abs`, QUOTED clamped into range.
    pub fn initial_reduced(&self) -> Vec<f64> {
        self.free
            .iter()
            .map(|&i| match self.constraints[i] {
                Constraint::Positive => self.values[i].abs(),
                Constraint::Quoted { low, high } => self.values[i].clamp(low, high),
                _ => self.values[i],
            })
            .collect()
    }

    pub fn to_full(&self, reduced: &[f64]) -> Vec<f64> {
        let mut full = self.values.clone();
        for (&index, &value) in self.free.iter().zip(reduced) {
            full[index] = match self.constraints[index] {
                Constraint::Positive => value.abs(),
                _ => value,
            };
        }
        for &index in &self.derived_order {
            full[index] = match self.constraints[index] {
                Constraint::Factor { reference, factor } => factor * full[reference],
                Constraint::Delta { reference, delta } => delta + full[reference],
                Constraint::Sum { reference, sum } => sum - full[reference],
                Constraint::Ignored => 0.0,
                _ => full[index],
            };
        }
        full
    }

    pub fn to_reduced(&self, full: &[f64]) -> Vec<f64> {
        self.free.iter().map(|&i| full[i]).collect()
    }

    /// Full-length uncertainties from the solver's free-parameter errors.
    pub fn sigma_full(&self, sigma_free: &[f64]) -> Vec<f64> {
        let mut sigma = vec![0.0; self.constraints.len()];
        for (&index, &s) in self.free.iter().zip(sigma_free) {
            sigma[index] = s;
        }
        for &index in &self.derived_order {
            sigma[index] = match self.constraints[index] {
                Constraint::Factor { reference, factor } => factor.abs() * sigma[reference],
                Constraint::Delta { reference, .. } | Constraint::Sum { reference, .. } => {
                    sigma[reference]
                }
                _ => 0.0,
            };
        }
        sigma
    }

    /// Derivative of every full parameter with respect to the free parameter
    /// at `position` of the reduced vector.
    pub fn tangent(&self, position: usize, reduced: &[f64]) -> Vec<f64> {
        let mut tangent = vec![0.0; self.constraints.len()];
        let index = self.free[position];
        tangent[index] = match self.constraints[index] {
            Constraint::Positive if reduced[position] < 0.0 => -1.0,
            _ => 1.0,
        };
        for &derived in &self.derived_order {
            tangent[derived] = match self.constraints[derived] {
                Constraint::Factor { reference, factor } => factor * tangent[reference],
                Constraint::Delta { reference, .. } => tangent[reference],
                Constraint::Sum { reference, .. } => -tangent[reference],
                _ => 0.0,
            };
        }
        tangent
    }

    /// Resolver with `index` pinned at `value` as a FIXED parameter.
    pub fn with_fixed(&self, index: usize, value: f64) -> Result<Self, FitError> {
        let mut constraints = self.constraints.clone();
        let mut values = self.values.clone();
        constraints[index] = Constraint::Fixed;
        values[index] = value;
        Self::new(&constraints, &values)
    }

    /// Same constraints, new stored values.
    pub fn with_values(&self, values: &[f64]) -> Result<Self, FitError> {
        Self::new(&self.constraints, values)
    }
}
