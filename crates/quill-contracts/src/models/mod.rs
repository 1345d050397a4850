mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, IMAGE, TEXT};
pub use selectors::{ModelSelection, ModelSelector};
