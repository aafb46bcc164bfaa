//! Axis tick placement at "nice" values for linear and logarithmic axes.

/// Tolerance for comparing computed tick values against the data range.
const RELATIVE_SLACK: f64 = 1e-12;

/// Upper bound on the tick count a linear axis may ask for.
pub const MAX_TICK_COUNT: usize = 1000;

/// Tick positions and the display range they suggest.
#[derive(PartialEq, Default, Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct TickSet {
    /// Major ticks, ascending.
    pub ticks: Vec<f64>,
    /// Recommended `(min, max)` of the axis.
    pub range: (f64, f64),
    /// Intermediate labelled ticks of a log axis; empty for linear axes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medium: Vec<f64>,
}

impl TickSet {
    fn mirrored(self) -> Self {
        let negate =
            |values: Vec<f64>| -> Vec<f64> { values.into_iter().rev().map(|v| -v).collect() };
        Self {
            ticks: negate(self.ticks),
            range: (-self.range.1, -self.range.0),
            medium: negate(self.medium),
        }
    }

    /// The bounds themselves, for ranges no tick rule can handle.
    fn bounds_only(min: f64, max: f64) -> Self {
        Self {
            ticks: vec![min, max],
            range: (min, max),
            medium: Vec::new(),
        }
    }
}

/// Rounds a positive value to 1, 2, 4, 6 or 10 times a power of ten.
///
/// Zero, negative and non-finite values are returned unchanged.
pub fn nice_number(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return value;
    }

    let exponent = value.log10().floor() as i32;
    let scale = 10f64.powi(exponent);
    let fraction = value / scale;

    let nice = if fraction < 1.5 {
        1.0
    } else if fraction < 2.5 {
        2.0
    } else if fraction < 5.0 {
        4.0
    } else if fraction < 7.0 {
        6.0
    } else {
        10.0
    };
    nice * scale
}

/// Ticks for a linear axis aiming at `count` ticks over `[min, max]`.
///
/// `count` is clamped to `2..=MAX_TICK_COUNT`.
pub fn calc_linear_ticks(min: f64, max: f64, count: usize) -> TickSet {
    let (min, max) = if min > max { (max, min) } else { (min, max) };

    if min == max {
        let (low, high) = if min == 0.0 {
            (-1.0, 1.0)
        } else {
            (min - 0.05 * min.abs(), max + 0.05 * max.abs())
        };
        return TickSet {
            ticks: vec![low, min, high],
            range: (low, high),
            medium: Vec::new(),
        };
    }

    let intervals = count.clamp(2, MAX_TICK_COUNT) - 1;
    let spacing = nice_number((max - min) / intervals as f64);
    if !spacing.is_finite() || spacing <= 0.0 {
        log::warn!("Cannot place linear ticks on [{min}, {max}]");
        return TickSet::bounds_only(min, max);
    }

    let first = (min / spacing).floor() as i64;
    let last = (max / spacing).ceil() as i64;
    let ticks: Vec<f64> = (first..=last).map(|k| k as f64 * spacing).collect();

    TickSet {
        range: (first as f64 * spacing, last as f64 * spacing),
        ticks,
        medium: Vec::new(),
    }
}

/// Ticks for a logarithmic axis over `[min, max]`.
///
/// Negative ranges are mirrored. Ranges that touch or cross zero are split at
/// a linear threshold three decades below the larger magnitude and spliced by
/// [`calc_symlog_ticks`].
pub fn calc_log_ticks(min: f64, max: f64) -> TickSet {
    let (min, max) = if min > max { (max, min) } else { (min, max) };
    if !min.is_finite() || !max.is_finite() {
        log::warn!("Cannot place log ticks on [{min}, {max}]");
        return TickSet::bounds_only(min, max);
    }

    if min > 0.0 {
        return positive_log_ticks(min, max);
    }
    if max < 0.0 {
        return positive_log_ticks(-max, -min).mirrored();
    }

    let magnitude = min.abs().max(max.abs());
    if magnitude == 0.0 {
        return calc_linear_ticks(min, max, 3);
    }
    let threshold = 10f64.powi(magnitude.log10().floor() as i32 - 3);
    calc_symlog_ticks(min, max, threshold)
}

/// Log ticks on both sides of zero, joined by a tick at exactly zero.
///
/// Each side runs from `linear_threshold` out to its own magnitude; a side
/// that does not reach past the threshold contributes no ticks.
pub fn calc_symlog_ticks(min: f64, max: f64, linear_threshold: f64) -> TickSet {
    let (min, max) = if min > max { (max, min) } else { (min, max) };
    if !min.is_finite() || !max.is_finite() {
        log::warn!("Cannot place symlog ticks on [{min}, {max}]");
        return TickSet::bounds_only(min, max);
    }
    let threshold = linear_threshold.abs();
    if threshold == 0.0 || !threshold.is_finite() {
        log::warn!("Invalid linear threshold {linear_threshold}, using linear ticks");
        return calc_linear_ticks(min, max, 5);
    }

    let negative = (-min > threshold).then(|| positive_log_ticks(threshold, -min).mirrored());
    let positive = (max > threshold).then(|| positive_log_ticks(threshold, max));

    let mut ticks = Vec::new();
    let mut medium = Vec::new();
    let mut range = (min.min(0.0), max.max(0.0));

    if let Some(side) = negative {
        ticks.extend(side.ticks);
        medium.extend(side.medium);
        range.0 = side.range.0;
    }
    ticks.push(0.0);
    if let Some(side) = positive {
        ticks.extend(side.ticks);
        medium.extend(side.medium);
        range.1 = side.range.1;
    }

    TickSet {
        ticks,
        range,
        medium,
    }
}

/// Medium-tick multiples for a span of `decades`.
fn medium_multiples(decades: i32) -> &'static [f64] {
    match decades {
        ..=2 => &[2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        3..=4 => &[2.0, 5.0],
        5 => &[5.0],
        _ => &[],
    }
}

fn positive_log_ticks(min: f64, max: f64) -> TickSet {
    let low_decade = min.log10().floor() as i32;
    let mut high_decade = max.log10().ceil() as i32;
    if high_decade == low_decade {
        high_decade += 1;
    }

    let ticks: Vec<f64> = (low_decade..=high_decade).map(|d| 10f64.powi(d)).collect();
    let multiples = medium_multiples(high_decade - low_decade);
    let candidates: Vec<f64> = (low_decade..high_decade)
        .flat_map(|d| multiples.iter().map(move |m| m * 10f64.powi(d)))
        .collect();

    // tighten the range to the closest tick of either kind around the data
    let below = |v: f64| v <= min * (1.0 + RELATIVE_SLACK);
    let above = |v: f64| v >= max * (1.0 - RELATIVE_SLACK);
    let lower = ticks
        .iter()
        .chain(&candidates)
        .copied()
        .filter(|&v| below(v))
        .fold(ticks[0], f64::max);
    let upper = ticks
        .iter()
        .chain(&candidates)
        .copied()
        .filter(|&v| above(v))
        .fold(ticks[ticks.len() - 1], f64::min);

    let mut medium: Vec<f64> = candidates
        .into_iter()
        .filter(|&v| v >= lower && v <= upper)
        .collect();
    medium.sort_by(f64::total_cmp);

    TickSet {
        ticks,
        range: (lower, upper),
        medium,
    }
}
