//! The Gaussian decomposition seam.
//!
//! Fitting is done outside this crate (an AGD implementation such as
//! GaussPy). A [`GaussianDecomposer`] either drives that program or picks up
//! a result file it already wrote; both return components indexed like the
//! [`SpectrumSet`] that was handed in.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::data::loader::{decomposition_file_name, load_decomposition, save_spectrum_set, spectra_file_name};
use crate::data::model::{Decomposition, SpectrumSet};

/// Smoothing and detection parameters of the two-phase AGD fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgdParameters {
    pub alpha1: f64,
    pub alpha2: f64,
    pub snr_thresh: f64,
}

pub trait GaussianDecomposer {
    /// Fit every spectrum of `set`.
    fn decompose(&self, set: &SpectrumSet) -> Result<Decomposition>;
}

// ---------------------------------------------------------------------------
// Pre-computed result file
// ---------------------------------------------------------------------------

/// Reads a decomposition produced earlier for the same spectrum set.
#[derive(Debug, Clone)]
pub struct PrecomputedResults {
    pub path: PathBuf,
}

impl GaussianDecomposer for PrecomputedResults {
    fn decompose(&self, set: &SpectrumSet) -> Result<Decomposition> {
        let decomposition = load_decomposition(&self.path)?;
        decomposition
            .check_covers(set)
            .with_context(|| format!("{} does not match the extracted spectra", self.path.display()))?;
        Ok(decomposition)
    }
}

// ---------------------------------------------------------------------------
// External program
// ---------------------------------------------------------------------------

/// Runs an external decomposer on a persisted spectrum set.
///
/// Invocation: `<program> [args..] --input <set> --output <json> --alpha1 ..
/// --alpha2 .. --snr-thresh .. --phase two`. The program must write GaussPy's
/// `amplitudes_fit` / `fwhms_fit` / `means_fit` keys to `<json>`.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub parameters: AgdParameters,
    /// Where the input and output files are placed.
    pub work_dir: PathBuf,
}

impl ExternalCommand {
    fn command_for(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--input")
            .arg(input)
            .arg("--output")
            .arg(output)
            .arg("--alpha1")
            .arg(self.parameters.alpha1.to_string())
            .arg("--alpha2")
            .arg(self.parameters.alpha2.to_string())
            .arg("--snr-thresh")
            .arg(self.parameters.snr_thresh.to_string())
            .arg("--phase")
            .arg("two");
        cmd
    }
}

impl GaussianDecomposer for ExternalCommand {
    fn decompose(&self, set: &SpectrumSet) -> Result<Decomposition> {
        let input = self.work_dir.join(spectra_file_name(set.spw_id()));
        let output = self.work_dir.join(decomposition_file_name(set.spw_id()));
        save_spectrum_set(set, &input)?;

        // A result left by an earlier run must not pass for this one.
        match std::fs::remove_file(&output) {
            Ok(()) => debug!("Removed previous result {}", output.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("removing stale {}", output.display()))
            }
        }

        info!(
            "Running {} on {} spectra ({})",
            self.program,
            set.len(),
            input.display()
        );
        let status = self
            .command_for(&input, &output)
            .status()
            .with_context(|| format!("launching decomposer '{}'", self.program))?;
        if !status.success() {
            bail!("decomposer '{}' failed with {status}", self.program);
        }
        if !output.exists() {
            bail!(
                "decomposer '{}' exited successfully but wrote no {}",
                self.program,
                output.display()
            );
        }

        PrecomputedResults { path: output }.decompose(set)
    }
}

/// Pick the decomposer the configuration asks for.
///
/// Order: an explicit result file, then an external command, then the
/// default result file name in the output directory.
pub fn from_config(config: &PipelineConfig) -> Box<dyn GaussianDecomposer> {
    let decomposition = &config.decomposition;
    if let Some(path) = &decomposition.results {
        return Box::new(PrecomputedResults { path: path.clone() });
    }
    if let Some((program, args)) = decomposition.command.as_deref().and_then(|c| c.split_first()) {
        return Box::new(ExternalCommand {
            program: program.clone(),
            args: args.to_vec(),
            parameters: decomposition.agd_parameters(),
            work_dir: config.output_dir.clone(),
        });
    }
    let path = config.output_dir.join(decomposition_file_name(&config.spw_id));
    warn!(
        "No decomposer configured; expecting results at {}",
        path.display()
    );
    Box::new(PrecomputedResults { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::save_decomposition;
    use crate::data::model::{FittedComponent, PixelLocation, PixelSpectrum, SpectralBase};

    fn set_of(n: usize) -> SpectrumSet {
        let mut set = SpectrumSet::new("7", SpectralBase::Velocity);
        for x in 0..n {
            set.push(
                PixelSpectrum {
                    location: PixelLocation { x, y: 0 },
                    intensity: vec![0.0, 1.0, 0.0],
                    errors: vec![0.1; 3],
                },
                vec![-1.0, 0.0, 1.0],
            )
            .unwrap();
        }
        set
    }

    fn one_component_each(n: usize) -> Decomposition {
        Decomposition {
            components: vec![
                vec![FittedComponent {
                    amplitude: 1.0,
                    fwhm: 1.0,
                    mean: 0.0
                }];
                n
            ],
        }
    }

    #[test]
    fn precomputed_must_cover_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.json");
        save_decomposition(&one_component_each(2), &path).unwrap();

        let decomposer = PrecomputedResults { path };
        assert_eq!(decomposer.decompose(&set_of(2)).unwrap().len(), 2);
        assert!(decomposer.decompose(&set_of(3)).is_err());
    }

    #[test]
    fn config_prefers_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.json");
        save_decomposition(&one_component_each(1), &path).unwrap();

        let mut config = PipelineConfig::default();
        config.decomposition.command = Some(vec!["/nonexistent/agd".to_string()]);
        config.decomposition.results = Some(path);
        let decomposer = from_config(&config);
        assert_eq!(decomposer.decompose(&set_of(1)).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn external_command_receives_paths_and_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"
out=""; input=""; phase=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift ;;
    --input) input="$2"; shift ;;
    --phase) phase="$2"; shift ;;
  esac
  shift
done
[ -f "$input" ] || exit 3
[ "$phase" = two ] || exit 4
printf '{"amplitudes_fit":[[1.0],[]],"fwhms_fit":[[2.0],[]],"means_fit":[[0.5],[]]}' > "$out"
"#;
        let decomposer = ExternalCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "agd".to_string()],
            parameters: AgdParameters {
                alpha1: 0.1,
                alpha2: 12.0,
                snr_thresh: 3.0,
            },
            work_dir: dir.path().to_path_buf(),
        };

        let decomposition = decomposer.decompose(&set_of(2)).unwrap();
        assert_eq!(decomposition.components[0][0].mean, 0.5);
        assert!(decomposition.components[1].is_empty());
        assert!(dir.path().join("cube_7.parquet").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let decomposer = ExternalCommand {
            program: "false".to_string(),
            args: Vec::new(),
            parameters: AgdParameters {
                alpha1: 0.1,
                alpha2: 12.0,
                snr_thresh: 3.0,
            },
            work_dir: dir.path().to_path_buf(),
        };
        assert!(decomposer.decompose(&set_of(1)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn silent_command_does_not_reuse_previous_results() {
        let dir = tempfile::tempdir().unwrap();
        let previous = dir.path().join(decomposition_file_name("7"));
        save_decomposition(&one_component_each(2), &previous).unwrap();

        let decomposer = ExternalCommand {
            program: "true".to_string(),
            args: Vec::new(),
            parameters: AgdParameters {
                alpha1: 0.1,
                alpha2: 12.0,
                snr_thresh: 3.0,
            },
            work_dir: dir.path().to_path_buf(),
        };
        assert!(decomposer.decompose(&set_of(2)).is_err());
        assert!(!previous.exists());
    }
}
