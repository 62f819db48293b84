use thiserror::Error;

/// Failures raised by the numerical core (extraction, correction, stacking).
///
/// File and library errors are not wrapped here; they travel through
/// `anyhow` with context attached at the call site.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StackError {
    #[error("shape mismatch in {what}: axis has {axis} values but intensity has {intensity}")]
    ShapeMismatch {
        what: String,
        axis: usize,
        intensity: usize,
    },

    #[error("cannot stack an empty collection of spectra")]
    EmptyStack,

    #[error("unrecognized spectral axis type '{0}' (expected VELO-LSR or FREQ)")]
    UnknownAxisType(String),

    #[error("spectrum {index} has {found} channels, expected {expected}")]
    ChannelCountMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid pixel region on {axis}: {start}..{end} (extent {extent})")]
    InvalidRegion {
        axis: char,
        start: usize,
        end: usize,
        extent: usize,
    },

    #[error("decomposition has {found} entries for {field}, expected {expected}")]
    MisalignedDecomposition {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("spectrum {index}: {field} has {found} components, amplitudes_fit has {expected}")]
    MisalignedComponents {
        index: usize,
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("spectral base '{0}' carries no Doppler information")]
    NoDopplerMode(String),
}

pub type StackResult<T> = std::result::Result<T, StackError>;
