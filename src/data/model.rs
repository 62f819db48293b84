use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::doppler::DopplerRelation;
use crate::error::{StackError, StackResult};

// ---------------------------------------------------------------------------
// Axis type (CTYPE3) and spectral base
// ---------------------------------------------------------------------------

/// Physical quantity sampled along the cube's third axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisType {
    /// `CTYPE3 = 'VELO-LSR'`, values in m/s.
    Velocity,
    /// `CTYPE3 = 'FREQ'`, values in Hz.
    Frequency,
}

impl FromStr for AxisType {
    type Err = StackError;

    fn from_str(s: &str) -> StackResult<Self> {
        match s.trim() {
            "VELO-LSR" => Ok(AxisType::Velocity),
            "FREQ" => Ok(AxisType::Frequency),
            other => Err(StackError::UnknownAxisType(other.to_string())),
        }
    }
}

impl fmt::Display for AxisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisType::Velocity => write!(f, "VELO-LSR"),
            AxisType::Frequency => write!(f, "FREQ"),
        }
    }
}

/// Units of the `x_values` handed to the decomposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpectralBase {
    /// Velocity in km/s.
    #[default]
    #[serde(rename = "velo")]
    Velocity,
    /// Frequency in GHz.
    #[serde(rename = "freq")]
    Frequency,
    /// Bare channel index.
    #[serde(rename = "chan")]
    Channel,
}

impl FromStr for SpectralBase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "velo" => Ok(SpectralBase::Velocity),
            "freq" => Ok(SpectralBase::Frequency),
            "chan" => Ok(SpectralBase::Channel),
            other => Err(format!("unknown spectral base '{other}' (velo, freq, chan)")),
        }
    }
}

impl fmt::Display for SpectralBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectralBase::Velocity => write!(f, "velo"),
            SpectralBase::Frequency => write!(f, "freq"),
            SpectralBase::Channel => write!(f, "chan"),
        }
    }
}

// ---------------------------------------------------------------------------
// CubeHeader – the WCS scalars we need from the primary header
// ---------------------------------------------------------------------------

/// Header-derived description of a spectral cube.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeHeader {
    /// Spatial x extent.
    pub naxis1: usize,
    /// Spatial y extent.
    pub naxis2: usize,
    /// Number of spectral channels.
    pub naxis3: usize,
    /// Stokes planes (1 when the file has no fourth axis).
    pub naxis4: usize,
    pub crpix3: f64,
    pub cdelt3: f64,
    pub crval3: f64,
    pub axis_type: AxisType,
    /// `RESTFREQ` [Hz].
    pub restfreq: f64,
}

impl CubeHeader {
    /// Value of the spectral WCS at 0-based channel `i` (FITS pixels are 1-based).
    pub fn channel_value(&self, i: usize) -> f64 {
        self.crval3 + (i as f64 + 1.0 - self.crpix3) * self.cdelt3
    }

    /// Derive both the velocity and frequency axes from the spectral WCS.
    pub fn spectral_axes(&self) -> SpectralAxes {
        let relation = DopplerRelation::new(self.restfreq);
        let native: Vec<f64> = (0..self.naxis3).map(|i| self.channel_value(i)).collect();

        match self.axis_type {
            AxisType::Velocity => SpectralAxes {
                frequency: native.iter().map(|&v| relation.frequency(v)).collect(),
                velocity: native,
            },
            AxisType::Frequency => SpectralAxes {
                velocity: native.iter().map(|&f| relation.velocity(f)).collect(),
                frequency: native,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// SpectralAxes
// ---------------------------------------------------------------------------

/// Velocity [m/s] and frequency [Hz] of every channel; always equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralAxes {
    pub velocity: Vec<f64>,
    pub frequency: Vec<f64>,
}

impl SpectralAxes {
    pub fn len(&self) -> usize {
        self.velocity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.velocity.is_empty()
    }

    /// Axis in SI units matching `base` (channel base yields indices).
    pub fn native(&self, base: SpectralBase) -> Vec<f64> {
        match base {
            SpectralBase::Velocity => self.velocity.clone(),
            SpectralBase::Frequency => self.frequency.clone(),
            SpectralBase::Channel => (0..self.len()).map(|i| i as f64).collect(),
        }
    }

    /// Axis in decomposer units: km/s, GHz, or channel index.
    pub fn scaled(&self, base: SpectralBase) -> Vec<f64> {
        match base {
            SpectralBase::Velocity => self.velocity.iter().map(|v| v / 1e3).collect(),
            SpectralBase::Frequency => self.frequency.iter().map(|f| f / 1e9).collect(),
            SpectralBase::Channel => self.native(base),
        }
    }
}

// ---------------------------------------------------------------------------
// Pixel spectra and the persisted spectrum set
// ---------------------------------------------------------------------------

/// Spatial position of a spectrum; persisted as an `[x, y]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct PixelLocation {
    pub x: usize,
    pub y: usize,
}

impl From<(usize, usize)> for PixelLocation {
    fn from((x, y): (usize, usize)) -> Self {
        PixelLocation { x, y }
    }
}

impl From<PixelLocation> for (usize, usize) {
    fn from(loc: PixelLocation) -> Self {
        (loc.x, loc.y)
    }
}

impl fmt::Display for PixelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// One extracted spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSpectrum {
    pub location: PixelLocation,
    pub intensity: Vec<f64>,
    /// Per-channel noise, same length as `intensity`.
    pub errors: Vec<f64>,
}

/// Spectra packaged for the Gaussian decomposer.
///
/// The four sequences are aligned: entry `i` of each describes the same
/// spectrum. Entries are only ever appended, so the index doubles as the
/// key that ties decomposition results back to a pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSpectrumSet")]
pub struct SpectrumSet {
    spw_id: String,
    base: SpectralBase,
    data_list: Vec<Vec<f64>>,
    x_values: Vec<Vec<f64>>,
    errors: Vec<Vec<f64>>,
    location: Vec<PixelLocation>,
}

impl SpectrumSet {
    pub fn new(spw_id: impl Into<String>, base: SpectralBase) -> Self {
        Self::with_capacity(spw_id, base, 0)
    }

    pub fn with_capacity(spw_id: impl Into<String>, base: SpectralBase, capacity: usize) -> Self {
        SpectrumSet {
            spw_id: spw_id.into(),
            base,
            data_list: Vec::with_capacity(capacity),
            x_values: Vec::with_capacity(capacity),
            errors: Vec::with_capacity(capacity),
            location: Vec::with_capacity(capacity),
        }
    }

    /// Append a spectrum with the axis values it is sampled on.
    pub fn push(&mut self, spectrum: PixelSpectrum, x_values: Vec<f64>) -> StackResult<()> {
        let label = || format!("spectrum at {}", spectrum.location);
        if spectrum.intensity.len() != x_values.len() {
            return Err(StackError::ShapeMismatch {
                what: label(),
                axis: x_values.len(),
                intensity: spectrum.intensity.len(),
            });
        }
        if spectrum.errors.len() != x_values.len() {
            return Err(StackError::ShapeMismatch {
                what: format!("errors of {}", label()),
                axis: x_values.len(),
                intensity: spectrum.errors.len(),
            });
        }
        self.data_list.push(spectrum.intensity);
        self.x_values.push(x_values);
        self.errors.push(spectrum.errors);
        self.location.push(spectrum.location);
        Ok(())
    }

    pub fn spw_id(&self) -> &str {
        &self.spw_id
    }

    pub fn base(&self) -> SpectralBase {
        self.base
    }

    pub fn data_list(&self) -> &[Vec<f64>] {
        &self.data_list
    }

    pub fn x_values(&self) -> &[Vec<f64>] {
        &self.x_values
    }

    pub fn errors(&self) -> &[Vec<f64>] {
        &self.errors
    }

    pub fn location(&self) -> &[PixelLocation] {
        &self.location
    }

    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.data_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_list.is_empty()
    }
}

/// Unchecked wire form; converted through [`SpectrumSet::push`] on load.
#[derive(Debug, Deserialize)]
pub struct RawSpectrumSet {
    pub spw_id: String,
    pub base: SpectralBase,
    pub data_list: Vec<Vec<f64>>,
    pub x_values: Vec<Vec<f64>>,
    pub errors: Vec<Vec<f64>>,
    pub location: Vec<PixelLocation>,
}

impl TryFrom<RawSpectrumSet> for SpectrumSet {
    type Error = StackError;

    fn try_from(raw: RawSpectrumSet) -> StackResult<Self> {
        let n = raw.data_list.len();
        for (field, found) in [
            ("x_values", raw.x_values.len()),
            ("errors", raw.errors.len()),
            ("location", raw.location.len()),
        ] {
            if found != n {
                return Err(StackError::ShapeMismatch {
                    what: format!("spectrum set field '{field}'"),
                    axis: found,
                    intensity: n,
                });
            }
        }

        let mut set = SpectrumSet::with_capacity(raw.spw_id, raw.base, n);
        let rows = raw
            .data_list
            .into_iter()
            .zip(raw.x_values)
            .zip(raw.errors)
            .zip(raw.location);
        for (((intensity, x), errors), location) in rows {
            set.push(
                PixelSpectrum {
                    location,
                    intensity,
                    errors,
                },
                x,
            )?;
        }
        Ok(set)
    }
}

// ---------------------------------------------------------------------------
// Decomposition results
// ---------------------------------------------------------------------------

/// One Gaussian found by the decomposer, in decomposer units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedComponent {
    pub amplitude: f64,
    pub fwhm: f64,
    /// Line centroid.
    pub mean: f64,
}

impl FittedComponent {
    /// Gaussian profile value at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        let d = x - self.mean;
        self.amplitude * (-4.0 * std::f64::consts::LN_2 * d * d / (self.fwhm * self.fwhm)).exp()
    }
}

/// Fitted components per spectrum, indexed like the [`SpectrumSet`] they came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decomposition {
    pub components: Vec<Vec<FittedComponent>>,
}

impl Decomposition {
    /// Assemble from GaussPy-style parallel lists, checking every level aligns.
    pub fn from_parallel(
        amplitudes: Vec<Vec<f64>>,
        fwhms: Vec<Vec<f64>>,
        means: Vec<Vec<f64>>,
    ) -> StackResult<Self> {
        let n = amplitudes.len();
        for (field, found) in [("fwhms_fit", fwhms.len()), ("means_fit", means.len())] {
            if found != n {
                return Err(StackError::MisalignedDecomposition {
                    field,
                    expected: n,
                    found,
                });
            }
        }

        let components = amplitudes
            .into_iter()
            .zip(fwhms)
            .zip(means)
            .enumerate()
            .map(|(index, ((a, w), m))| {
                for (field, found) in [("fwhms_fit", w.len()), ("means_fit", m.len())] {
                    if found != a.len() {
                        return Err(StackError::MisalignedComponents {
                            index,
                            field,
                            expected: a.len(),
                            found,
                        });
                    }
                }
                Ok(a
                    .into_iter()
                    .zip(w)
                    .zip(m)
                    .map(|((amplitude, fwhm), mean)| FittedComponent {
                        amplitude,
                        fwhm,
                        mean,
                    })
                    .collect())
            })
            .collect::<StackResult<Vec<_>>>()?;

        Ok(Decomposition { components })
    }

    /// Number of spectra covered.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Fail unless this decomposition covers exactly `set`.
    pub fn check_covers(&self, set: &SpectrumSet) -> StackResult<()> {
        if self.len() != set.len() {
            return Err(StackError::MisalignedDecomposition {
                field: "spectra",
                expected: set.len(),
                found: self.len(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ShiftedSpectrum
// ---------------------------------------------------------------------------

/// A spectrum whose axis has been translated to remove its Doppler shift.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftedSpectrum {
    pub axis: Vec<f64>,
    pub intensity: Vec<f64>,
    /// Amount subtracted from the unshifted axis.
    pub shift: f64,
}

impl ShiftedSpectrum {
    pub fn new(axis: Vec<f64>, intensity: Vec<f64>, shift: f64) -> StackResult<Self> {
        if axis.len() != intensity.len() {
            return Err(StackError::ShapeMismatch {
                what: "shifted spectrum".to_string(),
                axis: axis.len(),
                intensity: intensity.len(),
            });
        }
        Ok(ShiftedSpectrum {
            axis,
            intensity,
            shift,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(axis_type: AxisType) -> CubeHeader {
        CubeHeader {
            naxis1: 4,
            naxis2: 3,
            naxis3: 5,
            naxis4: 1,
            crpix3: 1.0,
            cdelt3: 1000.0,
            crval3: -2000.0,
            axis_type,
            restfreq: 215.7e9,
        }
    }

    #[test]
    fn parses_axis_type() {
        assert_eq!("VELO-LSR".parse::<AxisType>(), Ok(AxisType::Velocity));
        assert_eq!("FREQ    ".parse::<AxisType>(), Ok(AxisType::Frequency));
        assert_eq!(
            "VRAD".parse::<AxisType>(),
            Err(StackError::UnknownAxisType("VRAD".to_string()))
        );
    }

    #[test]
    fn velocity_cube_axes() {
        let axes = header(AxisType::Velocity).spectral_axes();
        assert_eq!(axes.velocity, vec![-2000.0, -1000.0, 0.0, 1000.0, 2000.0]);
        assert_eq!(axes.frequency[2], 215.7e9);
        // Positive velocity means lower observed frequency.
        assert!(axes.frequency[4] < axes.frequency[0]);
        assert_eq!(axes.scaled(SpectralBase::Velocity)[0], -2.0);
        assert_eq!(axes.scaled(SpectralBase::Channel), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn reference_pixel_is_one_based() {
        let mut h = header(AxisType::Frequency);
        h.crpix3 = 3.0;
        h.crval3 = 215.7e9;
        h.cdelt3 = -1.0e6;
        let axes = h.spectral_axes();
        assert_eq!(axes.frequency[2], 215.7e9);
        assert_eq!(axes.velocity[2], 0.0);
        assert!(axes.velocity[0] < 0.0);
    }

    #[test]
    fn push_rejects_misaligned_spectrum() {
        let mut set = SpectrumSet::new("0", SpectralBase::Velocity);
        let spectrum = PixelSpectrum {
            location: PixelLocation { x: 0, y: 0 },
            intensity: vec![1.0, 2.0],
            errors: vec![0.1, 0.1],
        };
        assert!(set.push(spectrum.clone(), vec![0.0, 1.0, 2.0]).is_err());
        assert!(set.is_empty());
        set.push(spectrum, vec![0.0, 1.0]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn gaussian_peaks_at_mean_and_halves_at_fwhm() {
        let c = FittedComponent {
            amplitude: 2.0,
            fwhm: 4.0,
            mean: 10.0,
        };
        assert_eq!(c.evaluate(10.0), 2.0);
        assert!((c.evaluate(12.0) - 1.0).abs() < 1e-12);
        assert!((c.evaluate(8.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn decomposition_checks_alignment() {
        let ok = Decomposition::from_parallel(
            vec![vec![1.0], vec![]],
            vec![vec![2.0], vec![]],
            vec![vec![3.0], vec![]],
        )
        .unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.components[0][0].mean, 3.0);
        assert!(ok.components[1].is_empty());

        let bad = Decomposition::from_parallel(vec![vec![1.0]], vec![], vec![vec![3.0]]);
        assert!(matches!(
            bad,
            Err(StackError::MisalignedDecomposition { field: "fwhms_fit", .. })
        ));
    }

    #[test]
    fn component_mismatch_names_field_and_spectrum() {
        let result = Decomposition::from_parallel(
            vec![vec![1.0], vec![1.0, 0.5]],
            vec![vec![2.0], vec![2.0, 3.0]],
            vec![vec![3.0], vec![3.0, 4.0, 5.0]],
        );
        assert_eq!(
            result,
            Err(StackError::MisalignedComponents {
                index: 1,
                field: "means_fit",
                expected: 2,
                found: 3
            })
        );
    }
}
