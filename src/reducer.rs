use crate::error::{MovingWindowError, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub type ReduceFn = dyn Fn(&[f64]) -> f64 + Send + Sync;

#[derive(Clone)]
pub enum Reducer {
    Sum,
    Mean,
    Median,
    /// Population standard deviation.
    StdDev,
    Min,
    Max,
    /// A caller-supplied function. It must be deterministic; it runs once
    /// per output cell.
    Custom { name: String, func: Arc<ReduceFn> },
}

/// Name fragments, checked in order against the lower-cased input.
const NAMES: &[(&str, fn() -> Reducer)] = &[
    ("median", || Reducer::Median),
    ("mean", || Reducer::Mean),
    ("average", || Reducer::Mean),
    ("stdev", || Reducer::StdDev),
    ("std", || Reducer::StdDev),
    ("sd", || Reducer::StdDev),
    ("sum", || Reducer::Sum),
    ("min", || Reducer::Min),
    ("max", || Reducer::Max),
];

impl Reducer {
    /// Resolve a reducer name. Matching is case-insensitive and lenient:
    /// `np.nanmean`, `Mean` and `mean` all resolve to [`Reducer::Mean`].
    pub fn from_name(name: &str) -> Result<Self> {
        let lowered = name.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(MovingWindowError::UnknownReducer(name.to_string()));
        }
        NAMES
            .iter()
            .find(|(fragment, _)| lowered.contains(fragment))
            .map(|(_, make)| make())
            .ok_or_else(|| MovingWindowError::UnknownReducer(name.to_string()))
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Reducer::Custom {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Reducer::Sum => "sum",
            Reducer::Mean => "mean",
            Reducer::Median => "median",
            Reducer::StdDev => "sd",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Custom { name, .. } => name,
        }
    }

    /// Whether the result only depends on the sum of the sample and its
    /// length, so windows can be evaluated from prefix sums.
    pub fn is_summed(&self) -> bool {
        matches!(self, Reducer::Sum | Reducer::Mean)
    }

    /// Reduce `sample`, which may be reordered. An empty sample gives NaN.
    pub fn reduce(&self, sample: &mut [f64]) -> f64 {
        if sample.is_empty() {
            return f64::NAN;
        }
        let n = sample.len() as f64;
        match self {
            Reducer::Sum => sample.iter().sum(),
            Reducer::Mean => sample.iter().sum::<f64>() / n,
            Reducer::Median => median(sample),
            Reducer::StdDev => {
                let mean = sample.iter().sum::<f64>() / n;
                let var = sample.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                var.sqrt()
            }
            Reducer::Min => sample.iter().copied().fold(f64::INFINITY, f64::min),
            Reducer::Max => sample.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reducer::Custom { func, .. } => func(sample),
        }
    }

    /// Finish a summed reduction from the window total and cell count.
    pub fn from_total(&self, total: f64, count: usize) -> f64 {
        match self {
            Reducer::Mean => total / count as f64,
            _ => total,
        }
    }
}

fn median(sample: &mut [f64]) -> f64 {
    let len = sample.len();
    let (lower, upper, _) = sample.select_nth_unstable_by(len / 2, f64::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        return upper;
    }
    // even length: average with the largest value of the lower half
    let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (below + upper) / 2.0
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
            other => f.write_str(other.name()),
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Reducer {
    type Err = MovingWindowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert!(matches!(Reducer::from_name("sum"), Ok(Reducer::Sum)));
        assert!(matches!(Reducer::from_name("np.nanmean"), Ok(Reducer::Mean)));
        assert!(matches!(Reducer::from_name("MEDIAN"), Ok(Reducer::Median)));
        assert!(matches!(Reducer::from_name("numpy.std"), Ok(Reducer::StdDev)));
        assert!(matches!(Reducer::from_name("sd"), Ok(Reducer::StdDev)));
        assert!(matches!(Reducer::from_name("numpy.min"), Ok(Reducer::Min)));
        assert!(matches!(Reducer::from_name("amax"), Ok(Reducer::Max)));
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            Reducer::from_name("percentile"),
            Err(MovingWindowError::UnknownReducer(_))
        ));
        assert!(Reducer::from_name("  ").is_err());
    }

    #[test]
    fn test_reduce() {
        let sample = [4.0, 1.0, 3.0, 2.0];
        let run = |r: Reducer| r.reduce(&mut sample.clone());
        assert_eq!(run(Reducer::Sum), 10.0);
        assert_eq!(run(Reducer::Mean), 2.5);
        assert_eq!(run(Reducer::Median), 2.5);
        assert_eq!(run(Reducer::Min), 1.0);
        assert_eq!(run(Reducer::Max), 4.0);
        assert!((run(Reducer::StdDev) - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_median_odd() {
        assert_eq!(Reducer::Median.reduce(&mut [5.0, 1.0, 9.0, 3.0, 7.0]), 5.0);
        assert_eq!(Reducer::Median.reduce(&mut [2.0]), 2.0);
    }

    #[test]
    fn test_empty_sample_is_nan() {
        assert!(Reducer::Sum.reduce(&mut []).is_nan());
    }

    #[test]
    fn test_custom() {
        let range = Reducer::custom("range", |s: &[f64]| {
            let max = s.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = s.iter().copied().fold(f64::INFINITY, f64::min);
            max - min
        });
        assert_eq!(range.name(), "range");
        assert_eq!(range.reduce(&mut [3.0, 9.0, 4.0]), 6.0);
        assert!(!range.is_summed());
    }

    #[test]
    fn test_from_total() {
        assert_eq!(Reducer::Sum.from_total(12.0, 4), 12.0);
        assert_eq!(Reducer::Mean.from_total(12.0, 4), 3.0);
    }
}
