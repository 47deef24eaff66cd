//! Multiplicity functions f(σ) for the differential mass function.

use std::f64::consts::PI;

/// Fitting function selected by the `hmf_model` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmfFit {
    /// Press & Schechter (1974)
    PressSchechter,
    /// Sheth & Tormen (1999)
    ShethTormen,
    /// Jenkins et al. (2001)
    Jenkins,
}

impl HmfFit {
    pub const NAMES: &'static [&'static str] = &["PS", "ST", "Jenkins"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PS" => Some(HmfFit::PressSchechter),
            "ST" => Some(HmfFit::ShethTormen),
            "Jenkins" => Some(HmfFit::Jenkins),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HmfFit::PressSchechter => "PS",
            HmfFit::ShethTormen => "ST",
            HmfFit::Jenkins => "Jenkins",
        }
    }

    pub fn fsigma(&self, sigma: f64, delta_c: f64) -> f64 {
        let nu = delta_c / sigma;
        match self {
            HmfFit::PressSchechter => (2.0 / PI).sqrt() * nu * (-0.5 * nu * nu).exp(),
            HmfFit::ShethTormen => {
                let (a_norm, a, p) = (0.3222, 0.707, 0.3);
                let anu2 = a * nu * nu;
                a_norm * (2.0 * a / PI).sqrt() * nu * (-0.5 * anu2).exp() * (1.0 + anu2.powf(-p))
            }
            HmfFit::Jenkins => 0.315 * (-((1.0 / sigma).ln() + 0.61).abs().powf(3.8)).exp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for name in HmfFit::NAMES {
            assert_eq!(HmfFit::from_name(name).unwrap().name(), *name);
        }
        assert!(HmfFit::from_name("Tinker08").is_none());
    }

    #[test]
    fn test_press_schechter_peak() {
        // f_PS peaks at nu = 1
        let dc = 1.686;
        let peak = HmfFit::PressSchechter.fsigma(dc, dc);
        assert!((peak - (2.0 / PI).sqrt() * (-0.5f64).exp()).abs() < 1e-14);
        assert!(HmfFit::PressSchechter.fsigma(dc * 1.1, dc) < peak);
        assert!(HmfFit::PressSchechter.fsigma(dc * 0.9, dc) < peak);
    }

    #[test]
    fn test_fits_vanish_for_rare_peaks() {
        for fit in [HmfFit::PressSchechter, HmfFit::ShethTormen, HmfFit::Jenkins] {
            let f = fit.fsigma(0.1, 1.686);
            assert!(f >= 0.0 && f < 1e-20, "{} gives {f}", fit.name());
            assert!(fit.fsigma(1.0, 1.686) > 1e-3);
        }
    }
}
