/*
Copyright 2021 Jakub Lewandowski

This file is part of WRF Preparation System (WRFPREP).

WRF Preparation System (WRFPREP) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

WRF Preparation System (WRFPREP) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with WRF Preparation System (WRFPREP). If not, see https://www.gnu.org/licenses/.
*/

//! Cross-validation of the physically shared parameters of the WPS and
//! WRF namelists.
//!
//! Both namelists are edited independently by the user, so the domain
//! geometry they describe can drift apart. Running WPS and WRF with
//! disagreeing domains produces output that is at best rejected late
//! and at worst silently wrong, so the shared parameters are checked
//! once before any job is prepared and the first mismatch aborts the
//! run.

use super::{Namelist, Scalar, Value};
use crate::errors::NamelistError;
use log::info;

/// One physically shared parameter and where it lives in each
/// namelist.
struct ParamMapping {
    wrf_var: &'static str,
    wrf_group: &'static str,
    wps_var: &'static str,
    wps_group: &'static str,
}

/// The parameters that must agree between the two namelists.
const PARAMS_TO_MATCH: [ParamMapping; 10] = [
    ParamMapping {
        wrf_var: "max_dom",
        wrf_group: "domains",
        wps_var: "max_dom",
        wps_group: "share",
    },
    ParamMapping {
        wrf_var: "interval_seconds",
        wrf_group: "time_control",
        wps_var: "interval_seconds",
        wps_group: "share",
    },
    ParamMapping {
        wrf_var: "parent_id",
        wrf_group: "domains",
        wps_var: "parent_id",
        wps_group: "geogrid",
    },
    ParamMapping {
        wrf_var: "parent_grid_ratio",
        wrf_group: "domains",
        wps_var: "parent_grid_ratio",
        wps_group: "geogrid",
    },
    ParamMapping {
        wrf_var: "i_parent_start",
        wrf_group: "domains",
        wps_var: "i_parent_start",
        wps_group: "geogrid",
    },
    ParamMapping {
        wrf_var: "j_parent_start",
        wrf_group: "domains",
        wps_var: "j_parent_start",
        wps_group: "geogrid",
    },
    ParamMapping {
        wrf_var: "e_we",
        wrf_group: "domains",
        wps_var: "e_we",
        wps_group: "geogrid",
    },
    ParamMapping {
        wrf_var: "e_sn",
        wrf_group: "domains",
        wps_var: "e_sn",
        wps_group: "geogrid",
    },
    ParamMapping {
        wrf_var: "dx",
        wrf_group: "domains",
        wps_var: "dx",
        wps_group: "geogrid",
    },
    ParamMapping {
        wrf_var: "dy",
        wrf_group: "domains",
        wps_var: "dy",
        wps_group: "geogrid",
    },
];

/// Checks that the parameters shared by the WRF and WPS namelists
/// agree, aborting on the first mismatch.
pub fn check_consistency(wps: &Namelist, wrf: &Namelist) -> Result<(), NamelistError> {
    info!("Check for consistency between key parameters of the WRF and WPS namelists");

    for param in &PARAMS_TO_MATCH {
        let value_wrf = wrf.get(param.wrf_group, param.wrf_var)?;
        let value_wps = wps.get(param.wps_group, param.wps_var)?;

        // dx and dy are held differently by the two namelists: WPS
        // stores the spacing of the outermost domain only while WRF
        // lists one value per domain
        if param.wrf_var == "dx" || param.wrf_var == "dy" {
            check_grid_spacing(param, wps, value_wrf, value_wps)?;
        } else {
            check_matching(param.wrf_var, value_wrf, value_wps)?;
        }
    }

    Ok(())
}

/// Validates the grid-spacing variables.
///
/// For a single domain the two entries must be directly equal. For
/// nested domains the per-domain spacing is reconstructed from the WPS
/// outer spacing by recursive division with each domain's refinement
/// ratio and the WRF sequence must equal the reconstruction
/// elementwise. The division is plain floating point and the
/// comparison is exact, no rounding tolerance is applied.
fn check_grid_spacing(
    param: &ParamMapping,
    wps: &Namelist,
    value_wrf: &Value,
    value_wps: &Value,
) -> Result<(), NamelistError> {
    let max_dom = wps.get_int("share", "max_dom")?;

    let mismatch = |wps_rendering: String| NamelistError::ValueMismatch {
        parameter: param.wrf_var,
        wrf: value_wrf.to_string(),
        wps: wps_rendering,
    };

    if max_dom == 1 {
        let wrf_scalar = match value_wrf {
            Value::Scalar(scalar) => scalar,
            Value::Sequence(seq) => seq
                .first()
                .ok_or(NamelistError::LengthMismatch(param.wrf_var))?,
        };
        let wps_scalar = value_wps
            .as_scalar()
            .ok_or(NamelistError::KindMismatch(param.wrf_var))?;

        if wrf_scalar != wps_scalar {
            return Err(mismatch(value_wps.to_string()));
        }
        return Ok(());
    }

    let outer = value_wps
        .as_scalar()
        .and_then(Scalar::as_f64)
        .ok_or(NamelistError::KindMismatch(param.wrf_var))?;
    let ratios = wps
        .get("geogrid", "parent_grid_ratio")?
        .as_sequence()
        .ok_or(NamelistError::KindMismatch("parent_grid_ratio"))?
        .to_vec();

    let mut expected = vec![outer];
    for idom in 1..max_dom as usize {
        let ratio = ratios
            .get(idom)
            .and_then(Scalar::as_f64)
            .ok_or(NamelistError::LengthMismatch("parent_grid_ratio"))?;
        expected.push(expected[idom - 1] / ratio);
    }

    let wrf_seq = value_wrf
        .as_sequence()
        .ok_or(NamelistError::KindMismatch(param.wrf_var))?;
    if wrf_seq.len() != expected.len() {
        return Err(NamelistError::LengthMismatch(param.wrf_var));
    }

    let expected_rendering = || {
        expected
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    for (wrf_scalar, expected_value) in wrf_seq.iter().zip(&expected) {
        if wrf_scalar.as_f64() != Some(*expected_value) {
            return Err(mismatch(expected_rendering()));
        }
    }

    Ok(())
}

/// Validates a parameter with no special handling: the kinds must
/// match, sequences must have equal length and all elements (or the
/// scalars) must be equal.
fn check_matching(
    parameter: &'static str,
    value_wrf: &Value,
    value_wps: &Value,
) -> Result<(), NamelistError> {
    let mismatch = || NamelistError::ValueMismatch {
        parameter,
        wrf: value_wrf.to_string(),
        wps: value_wps.to_string(),
    };

    match (value_wrf, value_wps) {
        (Value::Sequence(wrf_seq), Value::Sequence(wps_seq)) => {
            if wrf_seq.len() != wps_seq.len() {
                return Err(NamelistError::LengthMismatch(parameter));
            }
            if wrf_seq.iter().zip(wps_seq).any(|(a, b)| a != b) {
                return Err(mismatch());
            }
            Ok(())
        }
        (Value::Scalar(wrf_scalar), Value::Scalar(wps_scalar)) => {
            if wrf_scalar != wps_scalar {
                return Err(mismatch());
            }
            Ok(())
        }
        _ => Err(NamelistError::KindMismatch(parameter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wps_single_domain(dx: &str) -> Namelist {
        let text = format!(
            "\
&share
 max_dom = 1,
 interval_seconds = 21600,
/
&geogrid
 parent_id = 1,
 parent_grid_ratio = 1,
 i_parent_start = 1,
 j_parent_start = 1,
 e_we = 150,
 e_sn = 100,
 dx = {dx},
 dy = {dx},
/
"
        );
        Namelist::parse(&text).unwrap()
    }

    fn wrf_single_domain(dx: &str) -> Namelist {
        let text = format!(
            "\
&time_control
 interval_seconds = 21600,
/
&domains
 max_dom = 1,
 parent_id = 1,
 parent_grid_ratio = 1,
 i_parent_start = 1,
 j_parent_start = 1,
 e_we = 150,
 e_sn = 100,
 dx = {dx},
 dy = {dx},
/
"
        );
        Namelist::parse(&text).unwrap()
    }

    fn wps_nested() -> Namelist {
        Namelist::parse(
            "\
&share
 max_dom = 3,
 interval_seconds = 21600,
/
&geogrid
 parent_id = 1, 1, 2,
 parent_grid_ratio = 1, 3, 3,
 i_parent_start = 1, 31, 21,
 j_parent_start = 1, 17, 21,
 e_we = 150, 121, 91,
 e_sn = 100, 91, 61,
 dx = 30000,
 dy = 30000,
/
",
        )
        .unwrap()
    }

    fn wrf_nested(dx: &str) -> Namelist {
        let text = format!(
            "\
&time_control
 interval_seconds = 21600,
/
&domains
 max_dom = 3,
 parent_id = 1, 1, 2,
 parent_grid_ratio = 1, 3, 3,
 i_parent_start = 1, 31, 21,
 j_parent_start = 1, 17, 21,
 e_we = 150, 121, 91,
 e_sn = 100, 91, 61,
 dx = {dx},
 dy = {dx},
/
"
        );
        Namelist::parse(&text).unwrap()
    }

    #[test]
    fn matching_single_domain_namelists_pass() {
        let wps = wps_single_domain("30000");
        let wrf = wrf_single_domain("30000");
        assert!(check_consistency(&wps, &wrf).is_ok());
    }

    #[test]
    fn single_domain_spacing_mismatch_names_the_variable() {
        let wps = wps_single_domain("25000");
        let wrf = wrf_single_domain("30000");

        match check_consistency(&wps, &wrf) {
            Err(NamelistError::ValueMismatch { parameter, .. }) => assert_eq!(parameter, "dx"),
            other => panic!("expected a dx mismatch, got {:?}", other),
        }
    }

    #[test]
    fn nested_spacing_reconstruction_passes_on_exact_values() {
        // 30000 / 3 / 3 leaves a repeating fraction; the namelist value
        // must be the exact double the division produces
        let wps = wps_nested();
        let wrf = wrf_nested("30000.0, 10000.0, 3333.3333333333335");
        assert!(check_consistency(&wps, &wrf).is_ok());
    }

    #[test]
    fn rounded_spacing_is_close_but_not_exact() {
        // the comparison is exact by design: a value that would pass
        // any reasonable tolerance still fails the consistency check
        use float_cmp::approx_eq;

        let derived = 30000.0_f64 / 3.0 / 3.0;
        assert!(approx_eq!(f64, derived, 3333.333_333_333_3, epsilon = 1e-6));
        assert_ne!(derived, 3333.333_333_333_3_f64);
    }

    #[test]
    fn nested_spacing_reconstruction_rejects_rounded_values() {
        let wps = wps_nested();
        let wrf = wrf_nested("30000.0, 10000.0, 3333.33");

        match check_consistency(&wps, &wrf) {
            Err(NamelistError::ValueMismatch { parameter, .. }) => assert_eq!(parameter, "dx"),
            other => panic!("expected a dx mismatch, got {:?}", other),
        }
    }

    #[test]
    fn nested_spacing_accepts_integer_entries() {
        let wps = Namelist::parse(
            "\
&share
 max_dom = 2,
 interval_seconds = 21600,
/
&geogrid
 parent_id = 1, 1,
 parent_grid_ratio = 1, 3,
 i_parent_start = 1, 31,
 j_parent_start = 1, 17,
 e_we = 150, 121,
 e_sn = 100, 91,
 dx = 30000,
 dy = 30000,
/
",
        )
        .unwrap();
        let wrf = Namelist::parse(
            "\
&time_control
 interval_seconds = 21600,
/
&domains
 max_dom = 2,
 parent_id = 1, 1,
 parent_grid_ratio = 1, 3,
 i_parent_start = 1, 31,
 j_parent_start = 1, 17,
 e_we = 150, 121,
 e_sn = 100, 91,
 dx = 30000, 10000,
 dy = 30000, 10000,
/
",
        )
        .unwrap();

        assert!(check_consistency(&wps, &wrf).is_ok());
    }

    #[test]
    fn nested_spacing_sequence_length_must_match_domain_count() {
        let wps = wps_nested();
        let wrf = wrf_nested("30000.0, 10000.0");

        assert!(matches!(
            check_consistency(&wps, &wrf),
            Err(NamelistError::LengthMismatch("dx"))
        ));
    }

    #[test]
    fn scalar_against_sequence_is_a_kind_mismatch() {
        let wps = wps_single_domain("30000");
        let mut wrf = wrf_single_domain("30000");
        wrf.set(
            "time_control",
            "interval_seconds",
            Value::int_per_domain(21600, 1),
        );

        assert!(matches!(
            check_consistency(&wps, &wrf),
            Err(NamelistError::KindMismatch("interval_seconds"))
        ));
    }

    #[test]
    fn sequence_length_mismatch_is_reported() {
        let wps = wps_nested();
        let mut wrf = wrf_nested("30000.0, 10000.0, 3333.3333333333335");
        wrf.set(
            "domains",
            "e_we",
            Value::Sequence(vec![Scalar::Int(150), Scalar::Int(121)]),
        );

        assert!(matches!(
            check_consistency(&wps, &wrf),
            Err(NamelistError::LengthMismatch("e_we"))
        ));
    }

    #[test]
    fn first_mismatch_wins() {
        // max_dom is checked before the spacing, so a bad domain count
        // is reported even when dx would also disagree
        let wps = wps_single_domain("30000");
        let mut wrf = wrf_single_domain("25000");
        wrf.set("domains", "max_dom", Value::int(2));

        match check_consistency(&wps, &wrf) {
            Err(NamelistError::ValueMismatch { parameter, .. }) => {
                assert_eq!(parameter, "max_dom")
            }
            other => panic!("expected a max_dom mismatch, got {:?}", other),
        }
    }
}
