/// Map layer: pixelization, file formats, harmonic transforms and the
/// transform stage.
///
/// Architecture:
/// ```text
///  .fits            .parquet
///    │                 │
///    ▼                 ▼
///  ┌──────┐      ┌───────────┐
///  │ fits │      │ container │  datasets by path, pixel or alm
///  └──────┘      └───────────┘
///        │         │      │
///        ▼         ▼      ▼
///       ┌──────────┐  ┌──────────┐
///       │  loader  │◄─│ harmonic │  alm → map (synthesis)
///       └──────────┘  └──────────┘
///            │              ▲
///            ▼              │ smoothing
///       ┌───────────┐       │
///       │ transform │───────┘  scale, regrade, monopole/dipole, mask
///       └───────────┘
///            │
///            ▼
///         SkyMap (RING, NaN = undefined)
/// ```

pub mod container;
pub mod fits;
pub mod harmonic;
pub mod healpix;
pub mod loader;
pub mod model;
pub mod transform;

pub use loader::{load_map, write_fits_map};
pub use model::{LoadedMap, Mask, MapStats, Nside, SignalSelector, SkyMap};
pub use transform::{Removal, TransformOptions, apply_transforms, difference};
