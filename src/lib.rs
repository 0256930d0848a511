#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod engine;
pub mod ir;
pub mod layout;
pub mod layout_dump;
#[cfg(feature = "cli")]
pub mod logging;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, LayoutConfig, load_config};
pub use engine::{LayoutEngine, LayoutObserver, PreviewLineLock};
pub use ir::{GraphInput, InputEdge, InputNode};
pub use layout::{LayoutError, LayoutResult, execute_layout};
