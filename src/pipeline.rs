//! load → extract → decompose → correct → stack.
//!
//! Each stage takes what the previous one produced and returns a new value;
//! nothing is stored between calls.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::data::cube::Cube;
use crate::data::extract::extract_spectra;
use crate::data::filter::ComponentFilter;
use crate::data::loader::write_spectrum_csv;
use crate::data::model::{Decomposition, PixelLocation, ShiftedSpectrum, SpectralAxes, SpectrumSet};
use crate::decompose::GaussianDecomposer;
use crate::doppler::{CorrectionMode, DopplerCorrector};
use crate::stack::{stack_aligned, stack_interpolated, StackMode};

/// Result of the stacking stage.
#[derive(Debug, Clone)]
pub struct StackOutcome {
    pub mode: StackMode,
    /// Axis the average is sampled on (SI units, or channel index).
    pub axis: Vec<f64>,
    pub intensity: Vec<f64>,
    /// Shift removed from each stacked pixel (empty for `Redshift`).
    pub shifts: Vec<(PixelLocation, f64)>,
    /// Pixels left out for lack of a usable component.
    pub skipped: Vec<PixelLocation>,
    /// Number of spectra that went into the average.
    pub stacked: usize,
}

/// Everything one run produced, for callers that export intermediate data.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub spectra: SpectrumSet,
    /// `None` when the mode did not need a decomposition.
    pub decomposition: Option<Decomposition>,
    pub outcome: StackOutcome,
}

/// Pixel spectra of the configured region.
pub fn extract(cube: &Cube, axes: &SpectralAxes, config: &PipelineConfig) -> Result<SpectrumSet> {
    let set = extract_spectra(
        cube,
        axes,
        &config.region,
        config.rms,
        config.base,
        &config.spw_id,
    )?;
    info!("Extracted {} spectra (spw {})", set.len(), config.spw_id);
    Ok(set)
}

/// Shift-correct every spectrum that has a usable component.
///
/// Returns the corrected spectra with their pixels, plus the pixels skipped.
pub fn correct(
    axes: &SpectralAxes,
    set: &SpectrumSet,
    decomposition: &Decomposition,
    corrector: &DopplerCorrector,
    filter: &ComponentFilter,
) -> Result<(Vec<(PixelLocation, ShiftedSpectrum)>, Vec<PixelLocation>)> {
    decomposition.check_covers(set)?;

    let axis = match corrector.mode {
        CorrectionMode::Velocity => &axes.velocity,
        CorrectionMode::Frequency => &axes.frequency,
    };

    let mut corrected = Vec::with_capacity(set.len());
    let mut skipped = Vec::new();
    let centroids = filter.centroids(decomposition);

    for ((location, intensity), centroid) in set.location().iter().zip(set.data_list()).zip(centroids) {
        match centroid {
            Some(centroid) => {
                let shifted = corrector
                    .correct(axis, intensity, centroid)
                    .with_context(|| format!("correcting pixel {location}"))?;
                debug!("pixel {location}: centroid {centroid}, shift {}", shifted.shift);
                corrected.push((*location, shifted));
            }
            None => {
                debug!("pixel {location}: no usable component, skipped");
                skipped.push(*location);
            }
        }
    }

    if !skipped.is_empty() {
        warn!(
            "{} of {} pixels had no usable Gaussian component",
            skipped.len(),
            set.len()
        );
    }
    Ok((corrected, skipped))
}

/// Run the whole pipeline on a loaded cube.
///
/// `Redshift` mode averages the raw spectra by channel and never calls the
/// decomposer.
pub fn run(
    cube: &Cube,
    config: &PipelineConfig,
    decomposer: &dyn GaussianDecomposer,
) -> Result<PipelineRun> {
    let axes = cube.spectral_axes();
    let set = extract(cube, &axes, config)?;

    match config.stack.mode {
        StackMode::Redshift => {
            let intensity = stack_aligned(cube.header().naxis3, set.data_list())?;
            info!("Averaged {} spectra channel by channel", set.len());
            let outcome = StackOutcome {
                mode: StackMode::Redshift,
                axis: axes.native(config.base),
                intensity,
                shifts: Vec::new(),
                skipped: Vec::new(),
                stacked: set.len(),
            };
            Ok(PipelineRun {
                spectra: set,
                decomposition: None,
                outcome,
            })
        }
        StackMode::Unredshift => {
            let mode = CorrectionMode::try_from(config.base)?;
            let corrector = DopplerCorrector::new(
                mode,
                config.doppler.spw_restfreq,
                config.doppler.fit_linefreq,
            );

            let decomposition = decomposer.decompose(&set)?;
            let (corrected, skipped) = correct(
                &axes,
                &set,
                &decomposition,
                &corrector,
                &config.stack.component_filter(),
            )?;

            let target = match &config.stack.grid {
                Some(grid) => grid.values(),
                None => axes.native(config.base),
            };
            let intensity = stack_interpolated(
                &target,
                corrected
                    .iter()
                    .map(|(_, s)| (s.axis.as_slice(), s.intensity.as_slice())),
            )?;
            info!(
                "Stacked {} shift-corrected spectra onto {} points",
                corrected.len(),
                target.len()
            );

            let outcome = StackOutcome {
                mode: StackMode::Unredshift,
                axis: target,
                intensity,
                stacked: corrected.len(),
                shifts: corrected.into_iter().map(|(loc, s)| (loc, s.shift)).collect(),
                skipped,
            };
            Ok(PipelineRun {
                spectra: set,
                decomposition: Some(decomposition),
                outcome,
            })
        }
    }
}

/// Write one CSV per spectrum, with its fitted components evaluated on the
/// decomposer's axis, into `dir`. Returns the files written.
pub fn export_spectra(
    dir: &Path,
    set: &SpectrumSet,
    decomposition: &Decomposition,
) -> Result<Vec<PathBuf>> {
    decomposition.check_covers(set)?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut written = Vec::with_capacity(set.len());
    for (i, location) in set.location().iter().enumerate() {
        let path = dir.join(format!(
            "spectrum_{}_x{}_y{}.csv",
            set.spw_id(),
            location.x,
            location.y
        ));
        write_spectrum_csv(
            &path,
            &set.x_values()[i],
            &set.data_list()[i],
            &decomposition.components[i],
        )?;
        written.push(path);
    }
    debug!("Exported {} spectra to {}", written.len(), dir.display());
    Ok(written)
}
