use std::collections::BTreeMap;
use wdm_hmf::{
    Framework, HaloModel, ParamValue, Transfer, TransferWdm, WdmError, WdmInputs, WdmModel,
    WdmRegistry, Viel05,
};

fn transfer_params(extra: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
    let mut params = BTreeMap::new();
    params.insert("dlnk".to_string(), ParamValue::Float(0.1));
    for (name, value) in extra {
        params.insert(name.to_string(), value.clone());
    }
    params
}

fn scalar(model: &mut HaloModel, name: &str) -> f64 {
    model.quantity(name).unwrap().as_scalar().unwrap()
}

/// The WDM power spectrum is the CDM spectrum times T(k)^2
#[test]
fn test_wdm_power_is_cdm_power_times_transfer_squared() {
    let params = transfer_params(&[("wdm_mass", ParamValue::Float(1.5))]);
    let mut wdm = HaloModel::build("TransferWdm", &params).unwrap();
    let mut cdm = HaloModel::build("Transfer", &transfer_params(&[])).unwrap();

    let p_wdm = wdm.quantity("power").unwrap().to_vec();
    let p_cdm = cdm.quantity("power").unwrap().to_vec();
    let t = wdm.quantity("wdm_transfer_function").unwrap().to_vec();
    assert_eq!(p_wdm.len(), p_cdm.len());

    for ((pw, pc), ti) in p_wdm.iter().zip(&p_cdm).zip(&t) {
        if *pc > 1e-200 && *ti > 1e-50 {
            let ratio = pw / pc;
            assert!(
                (ratio / (ti * ti) - 1.0).abs() < 1e-8,
                "ratio {ratio} vs T^2 {}",
                ti * ti
            );
        }
    }
}

#[test]
fn test_half_mode_scales_shrink_with_particle_mass() {
    let mut last_m_hm = f64::INFINITY;
    let mut last_k_hm = 0.0;
    for mx in [0.5, 1.0, 2.0, 5.0] {
        let params = transfer_params(&[("wdm_mass", ParamValue::Float(mx))]);
        let mut model = HaloModel::build("TransferWdm", &params).unwrap();
        let m_hm = scalar(&mut model, "m_hm");
        let k_hm = scalar(&mut model, "k_hm");
        assert!(m_hm < last_m_hm, "m_hm should fall with mx ({mx} keV)");
        assert!(k_hm > last_k_hm, "k_hm should grow with mx ({mx} keV)");
        assert!(scalar(&mut model, "m_fs") < m_hm);
        last_m_hm = m_hm;
        last_k_hm = k_hm;
    }
}

/// The located half-mode wavenumber and the closed-form half-mode length agree
#[test]
fn test_half_mode_wavenumber_matches_length() {
    let params = transfer_params(&[("wdm_mass", ParamValue::Float(2.0))]);
    let mut model = HaloModel::build("TransferWdm", &params).unwrap();
    let lam_hm = scalar(&mut model, "lam_hm");
    let k_hm = scalar(&mut model, "k_hm");
    let expected = 2.0 * std::f64::consts::PI / lam_hm;
    assert!((k_hm / expected - 1.0).abs() < 1e-6, "k_hm = {k_hm}, 2pi/lam_hm = {expected}");
}

#[test]
fn test_bode01_and_viel05_differ() {
    let viel = transfer_params(&[("wdm_mass", ParamValue::Float(1.0))]);
    let bode = transfer_params(&[
        ("wdm_mass", ParamValue::Float(1.0)),
        ("wdm_transfer", ParamValue::Text("Bode01".to_string())),
    ]);
    let mut a = HaloModel::build("TransferWdm", &viel).unwrap();
    let mut b = HaloModel::build("TransferWdm", &bode).unwrap();
    let ratio = scalar(&mut a, "lam_eff_fs") / scalar(&mut b, "lam_eff_fs");
    assert!((ratio - 1.0).abs() > 1e-3);
}

#[test]
fn test_unknown_variant_and_bad_parameters() {
    let mut model: TransferWdm = TransferWdm::default();
    model.set_parameter("dlnk", ParamValue::Float(0.5)).unwrap();
    model
        .set_parameter("wdm_transfer", ParamValue::Text("Schneider12".to_string()))
        .unwrap();
    let err = model.quantity("wdm_transfer_function").unwrap_err();
    assert!(matches!(err, WdmError::UnknownVariant { .. }), "{err:?}");
    assert!(model.set_parameter("wdm_transfer", ParamValue::Float(1.0)).is_err());
    model
        .set_parameter("wdm_transfer", ParamValue::Text("Bode01".to_string()))
        .unwrap();

    let mut extra = BTreeMap::new();
    extra.insert("nu".to_string(), 1.0);
    model.set_parameter("wdm_params", ParamValue::Map(extra)).unwrap();
    assert!(model.quantity("wdm_transfer_function").is_err());

    model
        .set_parameter("wdm_params", ParamValue::Map(BTreeMap::new()))
        .unwrap();
    assert!(model.set_parameter("wdm_mass", ParamValue::Float(-1.0)).is_err());
    assert!(model.quantity("wdm_transfer_function").is_ok());
}

#[test]
fn test_custom_class_through_registry() {
    #[derive(Debug)]
    struct Sharp {
        inputs: WdmInputs,
        params: wdm_hmf::ModelParams,
    }

    impl WdmModel for Sharp {
        fn name(&self) -> &'static str {
            "Sharp"
        }
        fn inputs(&self) -> &WdmInputs {
            &self.inputs
        }
        fn params(&self) -> &wdm_hmf::ModelParams {
            &self.params
        }
        fn transfer(&self, lnk: &[f64]) -> wdm_hmf::WdmResult<Vec<f64>> {
            Ok(lnk.iter().map(|lk| if *lk < 2.0 { 1.0 } else { 1e-3 }).collect())
        }
        fn lam_eff_fs(&self) -> f64 {
            0.05
        }
        fn lam_hm(&self) -> f64 {
            0.5
        }
    }

    fn sharp(
        inputs: WdmInputs,
        overrides: &BTreeMap<String, f64>,
    ) -> wdm_hmf::WdmResult<std::sync::Arc<dyn WdmModel>> {
        let params = wdm_hmf::ModelParams::resolve("Sharp", &[], overrides)?;
        Ok(std::sync::Arc::new(Sharp { inputs, params }))
    }

    let mut registry = WdmRegistry::default();
    registry.register(wdm_hmf::WdmClass::new("Sharp", sharp));
    let mut model = TransferWdm::new(Transfer::default()).with_registry(std::sync::Arc::new(registry));
    model.set_parameter("dlnk", ParamValue::Float(0.5)).unwrap();
    model
        .set_parameter("wdm_transfer", ParamValue::Text("Sharp".to_string()))
        .unwrap();

    let t = model.quantity("wdm_transfer_function").unwrap().to_vec();
    assert!(t.iter().all(|v| *v == 1.0 || *v == 1e-3));
    assert!(t.contains(&1e-3));
}

#[test]
fn test_model_used_directly() {
    let inputs = WdmInputs::new(3.0, 0.25, 0.7, 0.3 * 2.7754e11);
    let model = Viel05::new(inputs, &BTreeMap::new()).unwrap();
    let t = model.transfer(&[-5.0, 0.0, 5.0]).unwrap();
    assert!((t[0] - 1.0).abs() < 1e-6);
    assert!(t[1] < t[0] && t[2] < t[1]);
    let k_hm = model.half_mode_wavenumber().unwrap();
    let t_hm = model.transfer(&[k_hm.ln()]).unwrap()[0];
    assert!((t_hm - 0.5).abs() < 1e-8);
}
