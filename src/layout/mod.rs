//! Layered layout pipeline: preprocess, build the hierarchy (or fall back to
//! plain topological layering), reduce crossings, assign coordinates and
//! refine them globally.

mod error;
mod executor;
mod hierarchy;
mod layering;
mod optimize;
mod ordering;
mod position;
mod preprocess;
mod score;
pub(crate) mod types;

pub use error::*;
pub use executor::*;
pub use hierarchy::*;
pub use layering::*;
pub use optimize::*;
pub use ordering::*;
pub use position::*;
pub use preprocess::*;
pub use score::*;
pub use types::*;
