//! # Configuration
//!
//! Run parameters for the extraction → decomposition → stacking pipeline,
//! read from a YAML file. Every section has defaults, so a file only needs
//! the keys it changes:
//!
//! ```yaml
//! spw_id: "1"
//! base: freq
//! doppler:
//!   fit_linefreq: 215.219259e9
//! stack:
//!   selection: nearest
//!   reference: 215.2
//! ```
//!
//! Command-line flags are applied on top with [`PipelineConfig::apply_overrides`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::extract::PixelRegion;
use crate::data::filter::{ComponentFilter, Selection};
use crate::data::model::SpectralBase;
use crate::decompose::AgdParameters;
use crate::stack::{AxisGrid, StackMode};

/// Rest frequencies used to remove the Doppler shift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DopplerConfig {
    /// Rest frequency of the spectral window [Hz].
    pub spw_restfreq: f64,
    /// Laboratory frequency of the fitted line [Hz].
    pub fit_linefreq: f64,
}

impl Default for DopplerConfig {
    fn default() -> Self {
        Self {
            spw_restfreq: 215.7e9,
            fit_linefreq: 215.219259e9,
        }
    }
}

/// How the Gaussian decomposition is obtained.
///
/// `results` wins over `command` when both are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    pub alpha1: f64,
    pub alpha2: f64,
    pub snr_thresh: f64,
    /// External decomposer: program followed by fixed arguments.
    pub command: Option<Vec<String>>,
    /// Pre-computed result file.
    pub results: Option<PathBuf>,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            alpha1: 0.1,
            alpha2: 12.0,
            snr_thresh: 3.0,
            command: None,
            results: None,
        }
    }
}

impl DecompositionConfig {
    pub fn agd_parameters(&self) -> AgdParameters {
        AgdParameters {
            alpha1: self.alpha1,
            alpha2: self.alpha2,
            snr_thresh: self.snr_thresh,
        }
    }
}

/// Stacking options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub mode: StackMode,
    pub selection: Selection,
    /// Reference centroid for `nearest`, in decomposer units (km/s or GHz).
    pub reference: Option<f64>,
    pub min_amplitude: f64,
    /// Common axis in SI units; the cube's own axis when absent.
    pub grid: Option<AxisGrid>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            mode: StackMode::Unredshift,
            selection: Selection::Strongest,
            reference: None,
            min_amplitude: 0.0,
            grid: None,
        }
    }
}

impl StackConfig {
    pub fn component_filter(&self) -> ComponentFilter {
        ComponentFilter {
            selection: self.selection,
            reference: self.reference,
            min_amplitude: self.min_amplitude,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Spectral-window identifier; names the intermediate files.
    pub spw_id: String,
    pub base: SpectralBase,
    /// Per-channel noise estimate written alongside every spectrum.
    pub rms: f64,
    pub region: PixelRegion,
    pub doppler: DopplerConfig,
    pub decomposition: DecompositionConfig,
    pub stack: StackConfig,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            spw_id: "0".to_string(),
            base: SpectralBase::Velocity,
            rms: 0.08,
            region: PixelRegion::default(),
            doppler: DopplerConfig::default(),
            decomposition: DecompositionConfig::default(),
            stack: StackConfig::default(),
            output_dir: PathBuf::from("."),
        }
    }
}

/// Values given on the command line; `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub spw_id: Option<String>,
    pub base: Option<SpectralBase>,
    pub rms: Option<f64>,
    pub x_range: Option<(usize, Option<usize>)>,
    pub y_range: Option<(usize, Option<usize>)>,
    pub mode: Option<StackMode>,
    pub results: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load from a YAML file; a missing file yields the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Configuration file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;
        let config: Self = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as YAML.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yml::to_string(self).context("Failed to serialize configuration")?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write configuration file at {:?}", path))
    }

    /// Apply command-line values, then re-validate.
    pub fn apply_overrides(&mut self, o: Overrides) -> Result<()> {
        if let Some(spw_id) = o.spw_id {
            self.spw_id = spw_id;
        }
        if let Some(base) = o.base {
            self.base = base;
        }
        if let Some(rms) = o.rms {
            self.rms = rms;
        }
        if let Some((start, end)) = o.x_range {
            self.region.x_start = start;
            self.region.x_end = end;
        }
        if let Some((start, end)) = o.y_range {
            self.region.y_start = start;
            self.region.y_end = end;
        }
        if let Some(mode) = o.mode {
            self.stack.mode = mode;
        }
        if let Some(results) = o.results {
            self.decomposition.results = Some(results);
        }
        if let Some(dir) = o.output_dir {
            self.output_dir = dir;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.rms > 0.0) {
            bail!("rms must be positive, got {}", self.rms);
        }
        if !(self.doppler.spw_restfreq > 0.0) || !(self.doppler.fit_linefreq > 0.0) {
            bail!(
                "rest frequencies must be positive (spw_restfreq {}, fit_linefreq {})",
                self.doppler.spw_restfreq,
                self.doppler.fit_linefreq
            );
        }
        if let Some(grid) = &self.stack.grid {
            if grid.count == 0 || grid.step == 0.0 || !grid.step.is_finite() {
                bail!("stack.grid needs count > 0 and a finite non-zero step");
            }
        }
        if self.stack.selection == Selection::Nearest && self.stack.reference.is_none() {
            bail!("stack.selection 'nearest' requires stack.reference");
        }
        if let Some(cmd) = &self.decomposition.command {
            if cmd.is_empty() {
                bail!("decomposition.command must name a program");
            }
        }
        Ok(())
    }
}

/// Parse `start:end` (end may be empty for "to the edge").
pub fn parse_range(s: &str) -> std::result::Result<(usize, Option<usize>), String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected start:end, got '{s}'"))?;
    let start = if start.is_empty() {
        0
    } else {
        start.parse().map_err(|e| format!("bad range start '{start}': {e}"))?
    };
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().map_err(|e| format!("bad range end '{end}': {e}"))?)
    };
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: PipelineConfig = serde_yml::from_str(
            "spw_id: \"2\"\nbase: freq\nstack:\n  mode: redshift\n  grid: {start: 1.0, step: 0.5, count: 4}\n",
        )
        .unwrap();
        assert_eq!(config.spw_id, "2");
        assert_eq!(config.base, SpectralBase::Frequency);
        assert_eq!(config.stack.mode, StackMode::Redshift);
        assert_eq!(config.stack.selection, Selection::Strongest);
        assert_eq!(config.rms, 0.08);
        assert_eq!(config.doppler.fit_linefreq, 215.219259e9);
        assert_eq!(config.stack.grid.unwrap().values(), vec![1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn nearest_needs_reference() {
        let mut config = PipelineConfig::default();
        config.stack.selection = Selection::Nearest;
        assert!(config.validate().is_err());
        config.stack.reference = Some(700.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(Overrides {
                rms: Some(0.02),
                x_range: Some((2, Some(5))),
                mode: Some(StackMode::Redshift),
                ..Overrides::default()
            })
            .unwrap();
        assert_eq!(config.rms, 0.02);
        assert_eq!(config.region.x_start, 2);
        assert_eq!(config.region.x_end, Some(5));
        assert_eq!(config.stack.mode, StackMode::Redshift);
        assert_eq!(config.spw_id, "0");

        assert!(config
            .apply_overrides(Overrides {
                rms: Some(0.0),
                ..Overrides::default()
            })
            .is_err());
    }

    #[test]
    fn parses_ranges() {
        assert_eq!(parse_range("3:7"), Ok((3, Some(7))));
        assert_eq!(parse_range("4:"), Ok((4, None)));
        assert_eq!(parse_range(":9"), Ok((0, Some(9))));
        assert!(parse_range("7").is_err());
        assert!(parse_range("a:2").is_err());
    }
}
