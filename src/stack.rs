//! Averaging many spectra into one profile.
//!
//! Two flavours: [`stack_interpolated`] resamples every (possibly shifted)
//! spectrum onto a common axis first; [`stack_aligned`] averages by channel
//! index for spectra that were never shifted.

use serde::{Deserialize, Serialize};

use crate::error::{StackError, StackResult};

/// Which averaging the stack stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackMode {
    /// Remove each pixel's Doppler shift, then interpolate and average.
    #[default]
    Unredshift,
    /// Average channel by channel, shifts left in.
    Redshift,
}

impl std::str::FromStr for StackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unredshift" => Ok(StackMode::Unredshift),
            "redshift" => Ok(StackMode::Redshift),
            other => Err(format!("unknown stack mode '{other}' (unredshift, redshift)")),
        }
    }
}

/// Evenly spaced target axis: `start + i * step` for `i in 0..count`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisGrid {
    pub start: f64,
    pub step: f64,
    pub count: usize,
}

impl AxisGrid {
    pub fn values(&self) -> Vec<f64> {
        (0..self.count)
            .map(|i| self.start + i as f64 * self.step)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Piecewise-linear interpolation with zero fill
// ---------------------------------------------------------------------------

/// Linear interpolant over sampled points; zero outside the sampled range.
#[derive(Debug, Clone)]
pub struct LinearInterpolant {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearInterpolant {
    /// Samples may come in either axis direction; they are sorted here.
    pub fn new(x: &[f64], y: &[f64]) -> StackResult<Self> {
        if x.len() != y.len() {
            return Err(StackError::ShapeMismatch {
                what: "interpolant".to_string(),
                axis: x.len(),
                intensity: y.len(),
            });
        }
        let mut points: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (xs, ys) = points.into_iter().unzip();
        Ok(LinearInterpolant { xs, ys })
    }

    /// Value at `t`. Sample positions return their sample exactly.
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.xs.len();
        if n == 0 || !(self.xs[0]..=self.xs[n - 1]).contains(&t) {
            return 0.0;
        }
        let hi = self.xs.partition_point(|&x| x < t);
        if self.xs[hi] == t {
            return self.ys[hi];
        }
        // t lies strictly inside (xs[hi - 1], xs[hi])
        let lo = hi - 1;
        let frac = (t - self.xs[lo]) / (self.xs[hi] - self.xs[lo]);
        self.ys[lo] + frac * (self.ys[hi] - self.ys[lo])
    }
}

// ---------------------------------------------------------------------------
// Stackers
// ---------------------------------------------------------------------------

/// Resample each `(axis, intensity)` pair onto `target` and take the
/// unweighted mean. Parts of `target` a spectrum does not cover count as 0
/// for that spectrum but still carry its weight in the denominator.
pub fn stack_interpolated<'a, I>(target: &[f64], spectra: I) -> StackResult<Vec<f64>>
where
    I: IntoIterator<Item = (&'a [f64], &'a [f64])>,
{
    let mut sum = vec![0.0; target.len()];
    let mut count = 0usize;

    for (axis, intensity) in spectra {
        let interp = LinearInterpolant::new(axis, intensity).map_err(|_| {
            StackError::ShapeMismatch {
                what: format!("stack input {count}"),
                axis: axis.len(),
                intensity: intensity.len(),
            }
        })?;
        for (acc, &t) in sum.iter_mut().zip(target) {
            *acc += interp.eval(t);
        }
        count += 1;
    }

    if count == 0 {
        return Err(StackError::EmptyStack);
    }
    let n = count as f64;
    Ok(sum.into_iter().map(|s| s / n).collect())
}

/// Channel-by-channel mean. Every spectrum must hold exactly `n_channels`
/// values (the cube's `NAXIS3`).
pub fn stack_aligned<S: AsRef<[f64]>>(n_channels: usize, spectra: &[S]) -> StackResult<Vec<f64>> {
    if spectra.is_empty() {
        return Err(StackError::EmptyStack);
    }

    let mut sum = vec![0.0; n_channels];
    for (index, spectrum) in spectra.iter().enumerate() {
        let values = spectrum.as_ref();
        if values.len() != n_channels {
            return Err(StackError::ChannelCountMismatch {
                index,
                expected: n_channels,
                found: values.len(),
            });
        }
        for (acc, v) in sum.iter_mut().zip(values) {
            *acc += v;
        }
    }

    let n = spectra.len() as f64;
    Ok(sum.into_iter().map(|s| s / n).collect())
}
