//! Halo mass functions: the reference CDM framework and its WDM counterpart.

pub mod fits;
pub mod mass_function;
pub mod mass_function_wdm;

pub use fits::HmfFit;
pub use mass_function::{cumulative_counts, lagrangian_radius, MassFunction, MASS_QUANTITIES};
pub use mass_function_wdm::{alter_factor, MassFunctionWdm, WDM_ALTER};
