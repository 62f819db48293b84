use crate::data::model::{ShiftedSpectrum, SpectralBase};
use crate::error::{StackError, StackResult};

/// Speed of light in vacuum [m/s].
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Velocity centroids come back from the decomposer in km/s.
const KM_S_TO_M_S: f64 = 1e3;
/// Frequency centroids come back from the decomposer in GHz.
const GHZ_TO_HZ: f64 = 1e9;

// ---------------------------------------------------------------------------
// Doppler relation (non-relativistic, radio convention)
// ---------------------------------------------------------------------------

/// `f_obs = f_rest * (1 - v / c)` and its inverse, for one rest frequency.
///
/// The cube loader and the corrector both go through this type so that a
/// velocity derived from a frequency converts back to the same frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DopplerRelation {
    pub rest_frequency: f64,
    pub speed_of_light: f64,
}

impl DopplerRelation {
    pub fn new(rest_frequency: f64) -> Self {
        Self {
            rest_frequency,
            speed_of_light: SPEED_OF_LIGHT,
        }
    }

    /// Observed frequency [Hz] of a line moving at `velocity` [m/s].
    pub fn frequency(&self, velocity: f64) -> f64 {
        self.rest_frequency * (1.0 - velocity / self.speed_of_light)
    }

    /// Velocity [m/s] at which the rest line is observed at `frequency` [Hz].
    pub fn velocity(&self, frequency: f64) -> f64 {
        self.speed_of_light * (1.0 - frequency / self.rest_frequency)
    }
}

// ---------------------------------------------------------------------------
// Corrector
// ---------------------------------------------------------------------------

/// Which spectral axis the shift is removed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionMode {
    /// Axis in Hz, centroids in GHz.
    Frequency,
    /// Axis in m/s, centroids in km/s.
    Velocity,
}

impl TryFrom<SpectralBase> for CorrectionMode {
    type Error = StackError;

    fn try_from(base: SpectralBase) -> StackResult<Self> {
        match base {
            SpectralBase::Velocity => Ok(CorrectionMode::Velocity),
            SpectralBase::Frequency => Ok(CorrectionMode::Frequency),
            SpectralBase::Channel => Err(StackError::NoDopplerMode(base.to_string())),
        }
    }
}

/// Removes the per-pixel Doppler shift implied by a fitted line centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DopplerCorrector {
    pub mode: CorrectionMode,
    /// Rest frequency of the spectral window [Hz].
    pub window: DopplerRelation,
    /// Laboratory frequency of the line the centroids belong to [Hz].
    pub line_frequency: f64,
}

impl DopplerCorrector {
    pub fn new(mode: CorrectionMode, spw_restfreq: f64, fit_linefreq: f64) -> Self {
        Self {
            mode,
            window: DopplerRelation::new(spw_restfreq),
            line_frequency: fit_linefreq,
        }
    }

    /// Velocity of the line's rest frequency on the window's velocity axis.
    pub fn line_rest_velocity(&self) -> f64 {
        self.window.velocity(self.line_frequency)
    }

    /// Shift (in axis units) implied by a centroid given in decomposer units.
    pub fn shift_for(&self, centroid: f64) -> f64 {
        match self.mode {
            CorrectionMode::Frequency => centroid * GHZ_TO_HZ - self.line_frequency,
            CorrectionMode::Velocity => centroid * KM_S_TO_M_S - self.line_rest_velocity(),
        }
    }

    /// Translate `axis` so the fitted centroid lands on the line's rest position.
    /// Returns the corrected axis and the applied shift.
    pub fn correct_axis(&self, axis: &[f64], centroid: f64) -> (Vec<f64>, f64) {
        let shift = self.shift_for(centroid);
        (translate(axis, shift), shift)
    }

    /// Shift-correct one spectrum. Intensities are carried over untouched.
    pub fn correct(
        &self,
        axis: &[f64],
        intensity: &[f64],
        centroid: f64,
    ) -> StackResult<ShiftedSpectrum> {
        let (corrected, shift) = self.correct_axis(axis, centroid);
        ShiftedSpectrum::new(corrected, intensity.to_vec(), shift)
    }
}

/// Rigid translation: every axis value minus `shift`.
pub fn translate(axis: &[f64], shift: f64) -> Vec<f64> {
    axis.iter().map(|&v| v - shift).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPW_REST: f64 = 215.7e9;
    const LINE: f64 = 215.219259e9;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn relation_round_trips() {
        let rel = DopplerRelation::new(SPW_REST);
        for v in [-3.0e5, 0.0, 1.2e4, 6.5e5] {
            assert!(close(rel.velocity(rel.frequency(v)), v, 1e-9));
        }
        assert_eq!(rel.frequency(0.0), SPW_REST);
    }

    #[test]
    fn frequency_shift_uses_ghz_centroid() {
        let corr = DopplerCorrector::new(CorrectionMode::Frequency, SPW_REST, LINE);
        let shift = corr.shift_for(215.2);
        assert!(close(shift, 215.2e9 - LINE, 1e-9));

        let (axis, applied) = corr.correct_axis(&[215.1e9, 215.2e9, 215.3e9], 215.2);
        assert_eq!(applied, shift);
        assert!(close(axis[1], LINE, 1e-12));
    }

    #[test]
    fn velocity_shift_uses_line_rest_velocity() {
        let corr = DopplerCorrector::new(CorrectionMode::Velocity, SPW_REST, LINE);
        let v_line = SPEED_OF_LIGHT * (1.0 - LINE / SPW_REST);
        assert!(close(corr.line_rest_velocity(), v_line, 1e-12));
        assert!(close(corr.shift_for(700.0), 700.0e3 - v_line, 1e-12));
    }

    #[test]
    fn negated_shift_restores_axis() {
        let axis: Vec<f64> = (0..64).map(|i| -5.0e4 + i as f64 * 1.3e3).collect();
        let corr = DopplerCorrector::new(CorrectionMode::Velocity, SPW_REST, LINE);
        let (shifted, shift) = corr.correct_axis(&axis, 612.5);
        let back = translate(&shifted, -shift);
        for (a, b) in axis.iter().zip(&back) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn velocity_and_frequency_corrections_agree() {
        let window = DopplerRelation::new(SPW_REST);
        let velo: Vec<f64> = (0..32).map(|i| 6.0e5 + i as f64 * 2.0e3).collect();
        let freq: Vec<f64> = velo.iter().map(|&v| window.frequency(v)).collect();

        // Same physical line position expressed in both unit systems.
        let v_obs = 6.3e5;
        let f_obs = window.frequency(v_obs);

        let by_velo = DopplerCorrector::new(CorrectionMode::Velocity, SPW_REST, LINE);
        let by_freq = DopplerCorrector::new(CorrectionMode::Frequency, SPW_REST, LINE);
        let (cv, _) = by_velo.correct_axis(&velo, v_obs / 1e3);
        let (cf, _) = by_freq.correct_axis(&freq, f_obs / 1e9);

        for (v, f) in cv.iter().zip(&cf) {
            assert!(close(window.frequency(*v), *f, 1e-9));
        }
    }

    #[test]
    fn correction_keeps_intensity() {
        let corr = DopplerCorrector::new(CorrectionMode::Frequency, SPW_REST, LINE);
        let spec = corr
            .correct(&[1.0, 2.0, 3.0], &[0.5, 1.5, 0.25], 215.3)
            .unwrap();
        assert_eq!(spec.intensity, vec![0.5, 1.5, 0.25]);
        assert_eq!(spec.axis.len(), 3);
    }

    #[test]
    fn correction_rejects_length_mismatch() {
        let corr = DopplerCorrector::new(CorrectionMode::Frequency, SPW_REST, LINE);
        assert!(matches!(
            corr.correct(&[1.0, 2.0], &[0.5], 215.3),
            Err(StackError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn channel_base_has_no_mode() {
        assert!(CorrectionMode::try_from(SpectralBase::Channel).is_err());
        assert_eq!(
            CorrectionMode::try_from(SpectralBase::Frequency),
            Ok(CorrectionMode::Frequency)
        );
    }
}
