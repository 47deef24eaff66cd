//! Transfer-function frameworks: the reference CDM implementation and the
//! WDM layer that wraps it.

pub mod transfer_model;
pub mod transfer_wdm;

pub use transfer_model::{Transfer, GROWTH, LNK, LN_P0, MEAN_DENS, RHO_CRIT0, TRANSFER};
pub use transfer_wdm::{TransferWdm, WDM, WDM_MASS, WDM_PARAMS, WDM_TRANSFER};
