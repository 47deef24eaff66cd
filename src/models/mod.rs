pub mod halo_model;
pub mod hmf;
pub mod interp;
pub mod transfer;
pub mod wdm;

/// Common traits used by every framework layer
pub mod traits {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::cache::{ParamValue, Quantity, Stamp};
    use crate::error::WdmResult;

    /// Parameter and derived-quantity surface shared by all frameworks.
    ///
    /// Layers compose: a wrapping layer answers for its own names and forwards
    /// everything else to the layer it wraps.
    pub trait Framework {
        /// Validate and store a parameter. Returns whether the value changed.
        fn set_parameter(&mut self, name: &str, value: ParamValue) -> WdmResult<bool>;

        fn parameter(&self, name: &str) -> Option<ParamValue>;

        fn parameter_names(&self) -> Vec<&'static str>;

        /// Dependency stamp of a parameter or cached quantity.
        fn stamp(&self, name: &str) -> Option<Stamp>;

        /// Read a named quantity, computing it (and anything it needs) on demand.
        fn quantity(&mut self, name: &str) -> WdmResult<Quantity>;

        fn quantity_names(&self) -> Vec<&'static str>;

        /// How many times a cached quantity has been computed.
        fn computations(&self, name: &str) -> Option<u64>;

        /// Apply several parameters in order; stops at the first failure.
        fn update(&mut self, params: &BTreeMap<String, ParamValue>) -> WdmResult<()> {
            for (name, value) in params {
                self.set_parameter(name, value.clone())?;
            }
            Ok(())
        }
    }

    /// What a mass-function layer needs from a transfer-function layer.
    pub trait TransferFramework: Framework {
        /// Natural-log wavenumber grid (h/Mpc).
        fn lnk(&mut self) -> WdmResult<Arc<[f64]>>;

        /// Normalised log power spectrum at z = 0 on the `lnk` grid.
        fn ln_p0(&mut self) -> WdmResult<Arc<[f64]>>;

        /// Linear growth factor at the current redshift, 1 at z = 0.
        fn growth(&mut self) -> WdmResult<f64>;

        /// Mean matter density, (M_sun/h) / (Mpc/h)^3.
        fn mean_dens(&self) -> f64;

        fn omegac(&self) -> f64;

        fn h(&self) -> f64;
    }
}

/// Numerical helpers shared by the frameworks
pub mod utils {
    /// `start, start + step, ...` while below `stop`, like numpy's `arange`.
    pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
        if !(step > 0.0) || !(stop > start) {
            return Vec::new();
        }
        // Guard against (stop - start) / step landing a hair above an integer
        let n = ((stop - start) / step - 1e-9).ceil().max(0.0) as usize;
        (0..n).map(|i| start + step * i as f64).collect()
    }

    /// Trapezoid rule on a uniform grid.
    pub fn trapezoid(y: &[f64], dx: f64) -> f64 {
        match y.len() {
            0 | 1 => 0.0,
            n => dx * (y[1..n - 1].iter().sum::<f64>() + 0.5 * (y[0] + y[n - 1])),
        }
    }

    /// Fourier transform of the real-space top-hat window.
    pub fn top_hat(x: f64) -> f64 {
        if x.abs() < 1e-3 {
            return 1.0 - x * x / 10.0;
        }
        3.0 * (x.sin() - x * x.cos()) / x.powi(3)
    }

    /// dW/dx of [`top_hat`].
    pub fn top_hat_deriv(x: f64) -> f64 {
        if x.abs() < 1e-3 {
            return -x / 5.0;
        }
        3.0 * ((x * x - 3.0) * x.sin() + 3.0 * x * x.cos()) / x.powi(4)
    }

}
