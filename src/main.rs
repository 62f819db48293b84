use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{error, info};

use spectral_stacker::config::{parse_range, Overrides, PipelineConfig};
use spectral_stacker::data::cube::Cube;
use spectral_stacker::data::loader::{save_spectrum_set, spectra_file_name, write_profile_csv};
use spectral_stacker::data::model::SpectralBase;
use spectral_stacker::stack::StackMode;
use spectral_stacker::{decompose, pipeline};

/// Un-redshift and stack the spectra of a spectral-line cube
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipeline configuration (YAML); defaults apply when the file is absent
    #[arg(short, long, default_value = "spectral-stacker.yaml")]
    config: PathBuf,

    /// Increase log detail (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the cube's spectral header and axes
    Info {
        #[arg(long)]
        cube: PathBuf,
    },
    /// Extract pixel spectra and write them for the Gaussian decomposer
    Extract {
        #[arg(long)]
        cube: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
        /// Output file (.parquet or .json); cube_<spw>.parquet in the output dir by default
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Correct and stack the spectra using a decomposition
    Stack {
        #[arg(long)]
        cube: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
        /// Decomposition result file (JSON with amplitudes_fit/fwhms_fit/means_fit)
        #[arg(long)]
        decomposition: Option<PathBuf>,
        /// unredshift or redshift
        #[arg(long)]
        mode: Option<StackMode>,
        /// Stacked profile CSV; stacked_<spw>.csv in the output dir by default
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write every spectrum with its fitted components as CSV
        #[arg(long)]
        export_spectra: bool,
    },
}

#[derive(Debug, ClapArgs)]
struct CommonArgs {
    /// Spectral-window identifier
    #[arg(long)]
    spw_id: Option<String>,

    /// Spectral base: velo, freq or chan
    #[arg(long)]
    base: Option<SpectralBase>,

    /// Per-channel noise estimate
    #[arg(long)]
    rms: Option<f64>,

    /// Pixel columns as start:end (end exclusive, may be empty)
    #[arg(long, value_parser = parse_range)]
    x_range: Option<(usize, Option<usize>)>,

    /// Pixel rows as start:end (end exclusive, may be empty)
    #[arg(long, value_parser = parse_range)]
    y_range: Option<(usize, Option<usize>)>,

    /// Directory for intermediate and output files
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl CommonArgs {
    fn overrides(self) -> Overrides {
        Overrides {
            spw_id: self.spw_id,
            base: self.base,
            rms: self.rms,
            x_range: self.x_range,
            y_range: self.y_range,
            output_dir: self.output_dir,
            ..Overrides::default()
        }
    }
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(args) {
        error!("{e:#}");
        exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = PipelineConfig::from_file(&args.config)?;

    match args.command {
        Command::Info { cube } => {
            let cube = open_cube(&cube)?;
            print_info(&cube);
        }
        Command::Extract {
            cube,
            common,
            output,
        } => {
            config.apply_overrides(common.overrides())?;
            let cube = open_cube(&cube)?;
            let axes = cube.spectral_axes();
            let set = pipeline::extract(&cube, &axes, &config)?;

            let path = output.unwrap_or_else(|| config.output_dir.join(spectra_file_name(&config.spw_id)));
            save_spectrum_set(&set, &path)?;
            info!("Wrote {} spectra to {}", set.len(), path.display());
        }
        Command::Stack {
            cube,
            common,
            decomposition,
            mode,
            output,
            export_spectra,
        } => {
            let mut overrides = common.overrides();
            overrides.results = decomposition;
            overrides.mode = mode;
            config.apply_overrides(overrides)?;

            let cube = open_cube(&cube)?;
            let decomposer = decompose::from_config(&config);
            let run = pipeline::run(&cube, &config, decomposer.as_ref())?;

            let path = output.unwrap_or_else(|| {
                config
                    .output_dir
                    .join(format!("stacked_{}.csv", config.spw_id))
            });
            write_profile_csv(&path, &run.outcome.axis, &run.outcome.intensity)?;
            info!(
                "Stacked {} spectra ({} skipped) into {}",
                run.outcome.stacked,
                run.outcome.skipped.len(),
                path.display()
            );

            if export_spectra {
                match &run.decomposition {
                    Some(decomposition) => {
                        let dir = config.output_dir.join(format!("spectra_{}", config.spw_id));
                        let written = pipeline::export_spectra(&dir, &run.spectra, decomposition)?;
                        info!("Exported {} spectra to {}", written.len(), dir.display());
                    }
                    None => info!("No decomposition in {:?} mode; nothing to export", run.outcome.mode),
                }
            }
        }
    }
    Ok(())
}

fn print_info(cube: &Cube) {
    let h = cube.header();
    let axes = cube.spectral_axes();
    println!("Pixels:       {} x {}", h.naxis1, h.naxis2);
    println!("Channels:     {}", h.naxis3);
    println!("Stokes:       {}", h.naxis4);
    println!("CTYPE3:       {}", h.axis_type);
    println!("CRPIX3:       {}", h.crpix3);
    println!("CRVAL3:       {}", h.crval3);
    println!("CDELT3:       {}", h.cdelt3);
    println!("RESTFREQ:     {} Hz", h.restfreq);
    if let (Some(v0), Some(v1)) = (axes.velocity.first(), axes.velocity.last()) {
        println!("Velocity:     {:.3} .. {:.3} km/s", v0 / 1e3, v1 / 1e3);
    }
    if let (Some(f0), Some(f1)) = (axes.frequency.first(), axes.frequency.last()) {
        println!("Frequency:    {:.6} .. {:.6} GHz", f0 / 1e9, f1 / 1e9);
    }
}

#[cfg(feature = "fits")]
fn open_cube(path: &Path) -> Result<Cube> {
    spectral_stacker::data::cube::load_cube(path)
}

#[cfg(not(feature = "fits"))]
fn open_cube(path: &Path) -> Result<Cube> {
    anyhow::bail!(
        "cannot read {}: built without FITS support (enable the 'fits' feature)",
        path.display()
    )
}
