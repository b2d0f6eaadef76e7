//! Build stages for kiln sites.
//!
//! Compiles templates, styles and scripts into the output directory, copies
//! static and third-party assets, and wires the stages into the task graph.

pub mod banner;
pub mod clean;
pub mod copy;
pub mod naming;
pub mod pipeline;
pub mod scripts;
pub mod styles;
pub mod templates;

pub use banner::{render_banner, PackageInfo};
pub use clean::CleanStage;
pub use copy::{AssetStage, VendorEntry, VendorStage};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, BUILD_TASK, DEFAULT_TASK};
pub use scripts::{ScriptSettings, ScriptStage};
pub use styles::{StyleSettings, StyleStage};
pub use templates::{TemplateSettings, TemplateStage};
