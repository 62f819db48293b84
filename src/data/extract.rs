use std::ops::Range;

use log::debug;
use serde::{Deserialize, Serialize};

use super::cube::Cube;
use super::model::{PixelLocation, PixelSpectrum, SpectralAxes, SpectralBase, SpectrumSet};
use crate::error::{StackError, StackResult};

// ---------------------------------------------------------------------------
// Pixel region
// ---------------------------------------------------------------------------

/// Rectangular pixel region: start inclusive, end exclusive.
/// A missing end means "to the edge of the cube".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelRegion {
    pub x_start: usize,
    pub x_end: Option<usize>,
    pub y_start: usize,
    pub y_end: Option<usize>,
}

impl PixelRegion {
    /// Resolve against a cube's spatial extent.
    pub fn resolve(&self, naxis1: usize, naxis2: usize) -> StackResult<(Range<usize>, Range<usize>)> {
        let x = bounded('x', self.x_start, self.x_end.unwrap_or(naxis1), naxis1)?;
        let y = bounded('y', self.y_start, self.y_end.unwrap_or(naxis2), naxis2)?;
        Ok((x, y))
    }
}

fn bounded(axis: char, start: usize, end: usize, extent: usize) -> StackResult<Range<usize>> {
    if start > end || end > extent {
        return Err(StackError::InvalidRegion {
            axis,
            start,
            end,
            extent,
        });
    }
    Ok(start..end)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Pull every spectrum of `region` out of `cube`.
///
/// Pixels are visited with `x` in the outer loop and `y` in the inner loop;
/// that order is the index shared by the persisted set and the decomposer's
/// results. Every channel gets the same noise estimate `rms`.
pub fn extract_spectra(
    cube: &Cube,
    axes: &SpectralAxes,
    region: &PixelRegion,
    rms: f64,
    base: SpectralBase,
    spw_id: &str,
) -> StackResult<SpectrumSet> {
    let header = cube.header();
    if axes.len() != header.naxis3 {
        return Err(StackError::ShapeMismatch {
            what: "cube spectral axis".to_string(),
            axis: axes.len(),
            intensity: header.naxis3,
        });
    }

    let (xs, ys) = region.resolve(header.naxis1, header.naxis2)?;
    let x_values = axes.scaled(base);
    let errors = vec![rms; header.naxis3];

    let mut set = SpectrumSet::with_capacity(spw_id, base, xs.len() * ys.len());
    for x in xs.clone() {
        for y in ys.clone() {
            let spectrum = PixelSpectrum {
                location: PixelLocation { x, y },
                intensity: cube.spectrum(x, y),
                errors: errors.clone(),
            };
            set.push(spectrum, x_values.clone())?;
        }
    }

    debug!(
        "Extracted {} spectra from x {:?}, y {:?} (base {base})",
        set.len(),
        xs,
        ys
    );
    Ok(set)
}
