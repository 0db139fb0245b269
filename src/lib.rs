//! HEALPix sky-map rendering for CMB component-separation products.
//!
//! ```text
//!  load_map ─► apply_transforms ─► infer (auto) ─► RenderSpec ─► project ─► render
//! ```
//!
//! [`pipeline::render`] runs the whole chain for one request.

pub mod config;
pub mod error;
pub mod infer;
pub mod map;
pub mod pipeline;
pub mod project;
pub mod range;
pub mod render;

pub use error::{RenderFailure, Result, SkyplotError};
pub use pipeline::{MapSource, RenderRequest, View, render, render_map};
