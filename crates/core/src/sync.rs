//! Which rate cells are mirrored to a CRM program record.
//!
//! Only Connected Solutions cells have a CRM counterpart. A cell path matches when its utility
//! and dispatch segments equal a configured mapping, ignoring case and surrounding spaces.

use serde::{Deserialize, Serialize};

const CONNECTED_SOLUTIONS_PREFIX: [&str; 2] = ["isoneRates", "connectedSolutions"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramMapping {
    /// CRM display name of the program.
    pub name: String,
    pub program_id: String,
    pub utility: String,
    pub dispatch: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSync {
    pub program_id: String,
    pub program_name: String,
    /// CRM year label, `2025-26` for the store's `25-26`.
    pub year: String,
}

pub fn match_cell(path: &str, mappings: &[ProgramMapping]) -> Option<ProgramSync> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    let [first, second, utility, dispatch, year] = segments.as_slice() else {
        return None;
    };
    if [*first, *second] != CONNECTED_SOLUTIONS_PREFIX {
        return None;
    }

    let mapping = mappings.iter().find(|mapping| {
        same_label(&mapping.utility, utility) && same_label(&mapping.dispatch, dispatch)
    })?;

    Some(ProgramSync {
        program_id: mapping.program_id.clone(),
        program_name: mapping.name.clone(),
        year: crm_year(year)?,
    })
}

/// `25-26` becomes `2025-26`. Anything that is not a two-digit pair is not a program year.
pub fn crm_year(store_year: &str) -> Option<String> {
    let (start, end) = store_year.trim().split_once('-')?;
    let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|byte| byte.is_ascii_digit());
    if !two_digits(start) || !two_digits(end) {
        return None;
    }
    Some(format!("20{start}-{end}"))
}

fn same_label(configured: &str, segment: &str) -> bool {
    configured.trim().eq_ignore_ascii_case(segment.trim())
}
