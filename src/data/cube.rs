use anyhow::{bail, Result};
use ndarray::{s, Array4};

use super::model::{CubeHeader, SpectralAxes};

// ---------------------------------------------------------------------------
// Cube – pixel data plus header
// ---------------------------------------------------------------------------

/// A spectral-line cube held entirely in memory.
///
/// Data is indexed `[stokes, channel, y, x]`, the C-order view of a FITS
/// image whose NAXIS1 is x and NAXIS3 the spectral axis. The array shape
/// always agrees with the header.
#[derive(Debug, Clone)]
pub struct Cube {
    header: CubeHeader,
    data: Array4<f32>,
}

impl Cube {
    /// Pair pixel data with its header, checking that the shapes agree.
    pub fn new(header: CubeHeader, data: Array4<f32>) -> Result<Self> {
        let expected = [header.naxis4, header.naxis3, header.naxis2, header.naxis1];
        if data.shape() != expected {
            bail!(
                "cube data has shape {:?} but header describes {:?}",
                data.shape(),
                expected
            );
        }
        Ok(Cube { header, data })
    }

    /// Build from a flat buffer in FITS storage order (NAXIS1 fastest).
    pub fn from_flat(header: CubeHeader, flat: Vec<f32>) -> Result<Self> {
        let shape = (header.naxis4, header.naxis3, header.naxis2, header.naxis1);
        let expected = shape.0 * shape.1 * shape.2 * shape.3;
        if flat.len() != expected {
            bail!(
                "cube holds {} values but header describes {expected}",
                flat.len()
            );
        }
        let data = Array4::from_shape_vec(shape, flat)?;
        Ok(Cube { header, data })
    }

    pub fn header(&self) -> &CubeHeader {
        &self.header
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Velocity and frequency axes from the spectral WCS.
    pub fn spectral_axes(&self) -> SpectralAxes {
        self.header.spectral_axes()
    }

    /// Spectrum of the first Stokes plane at pixel `(x, y)`.
    pub fn spectrum(&self, x: usize, y: usize) -> Vec<f64> {
        self.data
            .slice(s![0, .., y, x])
            .iter()
            .map(|&v| v as f64)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FITS reader
// ---------------------------------------------------------------------------

#[cfg(feature = "fits")]
pub use fits_io::load_cube;

#[cfg(feature = "fits")]
mod fits_io {
    use std::path::Path;

    use anyhow::{bail, Context, Result};
    use fitsio::hdu::FitsHdu;
    use fitsio::FitsFile;
    use log::{debug, info};

    use super::Cube;
    use crate::data::model::{AxisType, CubeHeader};

    /// Read the primary HDU of a FITS cube and its spectral WCS keywords.
    pub fn load_cube(path: &Path) -> Result<Cube> {
        let mut fits =
            FitsFile::open(path).with_context(|| format!("opening {}", path.display()))?;
        let hdu = fits.primary_hdu().context("reading primary HDU")?;

        let naxis = hdu.read_key::<i64>(&mut fits, "NAXIS")?;
        if !(3..=4).contains(&naxis) {
            bail!("{}: expected a 3-D or 4-D cube, found NAXIS={naxis}", path.display());
        }

        let axis_len = |fits: &mut FitsFile, key: &str| -> Result<usize> {
            let n = hdu
                .read_key::<i64>(fits, key)
                .with_context(|| format!("reading {key}"))?;
            usize::try_from(n).with_context(|| format!("{key}={n} is not a valid length"))
        };
        let naxis1 = axis_len(&mut fits, "NAXIS1")?;
        let naxis2 = axis_len(&mut fits, "NAXIS2")?;
        let naxis3 = axis_len(&mut fits, "NAXIS3")?;
        let naxis4 = if naxis == 4 {
            axis_len(&mut fits, "NAXIS4")?
        } else {
            1
        };

        let ctype3: String = hdu.read_key(&mut fits, "CTYPE3").context("reading CTYPE3")?;
        let axis_type: AxisType = ctype3.parse()?;

        let restfreq = match hdu.read_key::<f64>(&mut fits, "RESTFREQ") {
            Ok(v) => v,
            Err(e) if is_missing_key(&e) => hdu
                .read_key::<f64>(&mut fits, "RESTFRQ")
                .context("header has neither RESTFREQ nor RESTFRQ")?,
            Err(e) => return Err(e).context("reading RESTFREQ"),
        };

        let header = CubeHeader {
            naxis1,
            naxis2,
            naxis3,
            naxis4,
            crpix3: hdu.read_key(&mut fits, "CRPIX3").context("reading CRPIX3")?,
            cdelt3: hdu.read_key(&mut fits, "CDELT3").context("reading CDELT3")?,
            crval3: hdu.read_key(&mut fits, "CRVAL3").context("reading CRVAL3")?,
            axis_type,
            restfreq,
        };
        debug!("{}: {header:?}", path.display());

        let flat: Vec<f32> = read_pixels(&hdu, &mut fits)
            .with_context(|| format!("reading pixel data of {}", path.display()))?;

        info!(
            "Loaded {} ({} x {} pixels, {} channels, {})",
            path.display(),
            naxis1,
            naxis2,
            naxis3,
            header.axis_type
        );
        Cube::from_flat(header, flat)
    }

    /// cfitsio status `KEY_NO_EXIST`.
    const KEY_NO_EXIST: i32 = 202;

    fn is_missing_key(e: &fitsio::errors::Error) -> bool {
        matches!(e, fitsio::errors::Error::Fits(fe) if fe.status == KEY_NO_EXIST)
    }

    fn read_pixels(hdu: &FitsHdu, fits: &mut FitsFile) -> fitsio::errors::Result<Vec<f32>> {
        // cfitsio applies BSCALE/BZERO and maps blanks to NaN for float reads.
        hdu.read_image(fits)
    }
}


#[cfg(all(test, feature = "fits"))]
mod fits_tests {
    use std::path::Path;

    use fitsio::images::{ImageDescription, ImageType};
    use fitsio::FitsFile;

    use super::load_cube;
    use crate::data::model::AxisType;

    enum Key {
        Text(&'static str),
        Real(f64),
    }

    /// Write a float image whose pixel (c, y, x) holds `c*100 + y*10 + x`.
    fn write_cube(path: &Path, dimensions: &[usize], keys: &[(&str, Key)]) {
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions,
        };
        let mut fits = FitsFile::create(path)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fits.primary_hdu().unwrap();
        for (name, value) in keys {
            match value {
                Key::Text(v) => hdu.write_key(&mut fits, name, *v).unwrap(),
                Key::Real(v) => hdu.write_key(&mut fits, name, *v).unwrap(),
            }
        }

        let n = dimensions.len();
        let (nchan, ny, nx) = (dimensions[n - 3], dimensions[n - 2], dimensions[n - 1]);
        let mut data = Vec::new();
        for _ in 0..dimensions.iter().product::<usize>() / (nchan * ny * nx) {
            for c in 0..nchan {
                for y in 0..ny {
                    for x in 0..nx {
                        data.push((c * 100 + y * 10 + x) as f32);
                    }
                }
            }
        }
        hdu.write_image(&mut fits, &data).unwrap();
    }

    fn wcs(ctype: &'static str) -> Vec<(&'static str, Key)> {
        vec![
            ("CTYPE3", Key::Text(ctype)),
            ("CRPIX3", Key::Real(1.0)),
            ("CDELT3", Key::Real(1.0e6)),
            ("CRVAL3", Key::Real(215.0e9)),
        ]
    }

    #[test]
    fn three_dimensional_cube_uses_restfrq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        let mut keys = wcs("FREQ");
        keys.push(("RESTFRQ", Key::Real(215.7e9)));
        write_cube(&path, &[4, 2, 3], &keys);

        let cube = load_cube(&path).unwrap();
        let h = cube.header();
        assert_eq!((h.naxis1, h.naxis2, h.naxis3, h.naxis4), (3, 2, 4, 1));
        assert_eq!(cube.data().shape(), &[1, 4, 2, 3]);
        assert_eq!(h.axis_type, AxisType::Frequency);
        assert_eq!(h.restfreq, 215.7e9);
        assert_eq!(cube.spectrum(2, 1), vec![12.0, 112.0, 212.0, 312.0]);
        assert_eq!(cube.spectral_axes().frequency[1], 215.001e9);
    }

    #[test]
    fn four_dimensional_cube_prefers_restfreq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        let mut keys = wcs(" VELO-LSR");
        keys.push(("RESTFREQ", Key::Real(230.0e9)));
        keys.push(("RESTFRQ", Key::Real(1.0)));
        write_cube(&path, &[1, 4, 2, 3], &keys);

        let cube = load_cube(&path).unwrap();
        assert_eq!(cube.header().naxis4, 1);
        assert_eq!(cube.header().axis_type, AxisType::Velocity);
        assert_eq!(cube.header().restfreq, 230.0e9);
        assert_eq!(cube.spectrum(0, 1), vec![10.0, 110.0, 210.0, 310.0]);
    }

    #[test]
    fn unknown_ctype3_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        let mut keys = wcs("VRAD");
        keys.push(("RESTFREQ", Key::Real(215.7e9)));
        write_cube(&path, &[4, 2, 3], &keys);

        let err = load_cube(&path).unwrap_err();
        assert!(format!("{err:#}").contains("VRAD"));
    }

    #[test]
    fn unreadable_restfreq_is_not_replaced_by_restfrq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        let mut keys = wcs("FREQ");
        keys.push(("RESTFREQ", Key::Text("n/a")));
        keys.push(("RESTFRQ", Key::Real(215.7e9)));
        write_cube(&path, &[4, 2, 3], &keys);

        let err = load_cube(&path).unwrap_err();
        assert!(format!("{err:#}").contains("RESTFREQ"));
    }

    #[test]
    fn missing_rest_frequency_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");
        write_cube(&path, &[4, 2, 3], &wcs("FREQ"));
        assert!(load_cube(&path).is_err());
    }

    #[test]
    fn images_without_a_spectral_axis_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plane.fits");
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &[2, 3],
        };
        let mut fits = FitsFile::create(&path)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fits.primary_hdu().unwrap();
        hdu.write_image(&mut fits, &[0f32; 6]).unwrap();
        drop(fits);

        let err = load_cube(&path).unwrap_err();
        assert!(format!("{err:#}").contains("NAXIS=2"));
    }
}
