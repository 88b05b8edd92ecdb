pub mod catalog;
pub mod estimate;
pub mod providers;

pub use catalog::ModelCatalog;
pub use estimate::estimate_tokens;
pub use providers::{build_engine, EngineKind};
