//! Un-redshift and stack spectral-line cube spectra.
//!
//! Pixel spectra are cut out of a FITS cube ([`data::extract`]), handed to an
//! external Gaussian decomposer ([`decompose`]), shifted back to the line's
//! rest position using each pixel's fitted centroid ([`doppler`]) and
//! averaged onto a common axis ([`stack`]). [`pipeline`] chains the stages.

pub mod config;
pub mod data;
pub mod decompose;
pub mod doppler;
pub mod error;
pub mod pipeline;
pub mod stack;
