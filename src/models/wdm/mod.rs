//! Warm dark matter models and their registry.

pub mod registry;
pub mod wdm_model;

pub use registry::{WdmClass, WdmConstructor, WdmRegistry, BODE01, VIEL05};
pub use wdm_model::{sphere_mass, Bode01, Viel05, WdmInputs, WdmModel};
