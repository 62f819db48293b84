/// Data layer: cube access, extraction, persistence and component selection.
///
/// Architecture:
/// ```text
///  .fits cube
///        │
///        ▼
///   ┌──────────┐
///   │   cube    │  header + [stokes, channel, y, x] array → Cube, SpectralAxes
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ extract   │  pixel region → SpectrumSet (x outer, y inner)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  SpectrumSet ⇄ .parquet / .json,  decomposition .json → Decomposition
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  Decomposition → one centroid per spectrum (or none)
///   └──────────┘
/// ```

pub mod cube;
pub mod extract;
pub mod filter;
pub mod loader;
pub mod model;
