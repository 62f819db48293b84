use std::path::Path;

use anyhow::{Context, Result};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;

use spectral_stacker::config::DopplerConfig;
use spectral_stacker::data::loader::{decomposition_file_name, save_decomposition};
use spectral_stacker::data::model::{Decomposition, FittedComponent};
use spectral_stacker::doppler::DopplerRelation;

const NX: usize = 16;
const NY: usize = 12;
const NCHAN: usize = 128;
/// Channel width [m/s].
const CDELT3: f64 = 2.0e3;
/// Velocity of the first channel [m/s].
const CRVAL3: f64 = 540.0e3;
const FWHM: f64 = 10.0e3;
const NOISE: f64 = 0.02;

fn gaussian(x: f64, mu: f64, fwhm: f64, amplitude: f64) -> f64 {
    amplitude * (-4.0 * std::f64::consts::LN_2 * (x - mu).powi(2) / fwhm.powi(2)).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Line-of-sight velocity of pixel (x, y): a solid-body rotation along x.
fn pixel_velocity(x: usize, y: usize) -> f64 {
    let dx = x as f64 - (NX as f64 - 1.0) / 2.0;
    let dy = y as f64 - (NY as f64 - 1.0) / 2.0;
    6.0e3 * dx + 1.5e3 * dy
}

fn main() -> Result<()> {
    let doppler = DopplerConfig::default();
    let line_velocity = DopplerRelation::new(doppler.spw_restfreq).velocity(doppler.fit_linefreq);
    let velocity: Vec<f64> = (0..NCHAN).map(|i| CRVAL3 + i as f64 * CDELT3).collect();

    let mut rng = SimpleRng::new(42);

    // FITS storage order: x fastest, then y, then channel.
    let mut data = vec![0f32; NCHAN * NY * NX];
    for y in 0..NY {
        for x in 0..NX {
            let centre = line_velocity + pixel_velocity(x, y);
            for (c, &v) in velocity.iter().enumerate() {
                let value = gaussian(v, centre, FWHM, 1.0) + rng.gauss(0.0, NOISE);
                data[(c * NY + y) * NX + x] = value as f32;
            }
        }
    }

    // Truth in extraction order (x outer, y inner), centroids in km/s.
    let mut components = Vec::with_capacity(NX * NY);
    for x in 0..NX {
        for y in 0..NY {
            components.push(vec![FittedComponent {
                amplitude: 1.0,
                fwhm: FWHM / 1e3,
                mean: (line_velocity + pixel_velocity(x, y)) / 1e3,
            }]);
        }
    }

    let cube_path = Path::new("sample_cube.fits");
    write_cube(cube_path, &data, doppler.spw_restfreq)?;

    let truth_path = decomposition_file_name("0");
    save_decomposition(&Decomposition { components }, &truth_path)?;

    println!(
        "Wrote {NX}x{NY} pixels x {NCHAN} channels to {} and the exact decomposition to {}",
        cube_path.display(),
        truth_path.display()
    );
    Ok(())
}

fn write_cube(path: &Path, data: &[f32], restfreq: f64) -> Result<()> {
    // fitsio takes dimensions slowest-first: [NAXIS4, NAXIS3, NAXIS2, NAXIS1]
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[1, NCHAN, NY, NX],
    };
    let mut fits = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .with_context(|| format!("creating {}", path.display()))?;
    let hdu = fits.primary_hdu()?;

    hdu.write_key(&mut fits, "CTYPE3", "VELO-LSR")?;
    hdu.write_key(&mut fits, "CRPIX3", 1.0f64)?;
    hdu.write_key(&mut fits, "CRVAL3", CRVAL3)?;
    hdu.write_key(&mut fits, "CDELT3", CDELT3)?;
    hdu.write_key(&mut fits, "CUNIT3", "m/s")?;
    hdu.write_key(&mut fits, "RESTFREQ", restfreq)?;
    hdu.write_key(&mut fits, "BUNIT", "Jy/beam")?;
    hdu.write_image(&mut fits, data)?;
    Ok(())
}
