//! Effect type vocabulary.
//!
//! Effect annotations are attached to alleles by an external annotation pipeline.
//! This module only knows the names of the effect types and the named groups used in queries.

use crate::error::QueryCompileError;

use std::collections::BTreeSet;

//-----------------------------------------------------------------------------

/// All effect types known to the store.
pub const EFFECT_TYPES: [&str; 20] = [
    "3'UTR", "3'UTR-intron", "5'UTR", "5'UTR-intron",
    "frame-shift", "intergenic", "intron", "missense",
    "no-frame-shift", "no-frame-shift-newStop", "noEnd", "noStart",
    "non-coding", "non-coding-intron", "nonsense", "splice-site",
    "synonymous", "CDS", "CNV+", "CNV-",
];

const LGDS: [&str; 4] = ["frame-shift", "nonsense", "splice-site", "no-frame-shift-newStop"];

const NONSYNONYMOUS: [&str; 8] = [
    "frame-shift", "nonsense", "splice-site", "no-frame-shift-newStop",
    "missense", "no-frame-shift", "noStart", "noEnd",
];

const CODING: [&str; 10] = [
    "frame-shift", "nonsense", "splice-site", "no-frame-shift-newStop",
    "missense", "no-frame-shift", "noStart", "noEnd", "synonymous", "CDS",
];

const NONCODING: [&str; 8] = [
    "3'UTR", "3'UTR-intron", "5'UTR", "5'UTR-intron",
    "intergenic", "intron", "non-coding", "non-coding-intron",
];

const UTRS: [&str; 4] = ["3'UTR", "3'UTR-intron", "5'UTR", "5'UTR-intron"];

const CNVS: [&str; 2] = ["CNV+", "CNV-"];

// Returns the members of a named group.
fn group(name: &str) -> Option<&'static [&'static str]> {
    match name.to_ascii_lowercase().as_str() {
        "lgds" => Some(&LGDS),
        "nonsynonymous" => Some(&NONSYNONYMOUS),
        "coding" => Some(&CODING),
        "noncoding" => Some(&NONCODING),
        "utrs" => Some(&UTRS),
        "cnvs" => Some(&CNVS),
        _ => None,
    }
}

/// Returns `true` if the name is a known effect type.
pub fn is_known_effect_type(name: &str) -> bool {
    EFFECT_TYPES.contains(&name)
}

/// Expands group names and validates the effect types.
///
/// Group names (`LGDs`, `nonsynonymous`, `coding`, `noncoding`, `UTRs`, `CNVs`) are case-insensitive.
/// Effect type names are case-sensitive.
///
/// # Errors
///
/// Returns [`QueryCompileError::UnknownEffectType`] for names that are neither effect types nor groups.
pub fn expand_effect_types<S: AsRef<str>>(names: &[S]) -> Result<BTreeSet<String>, QueryCompileError> {
    let mut result = BTreeSet::new();
    for name in names {
        let name = name.as_ref().trim();
        if is_known_effect_type(name) {
            result.insert(name.to_string());
        } else if let Some(members) = group(name) {
            result.extend(members.iter().map(|x| x.to_string()));
        } else {
            return Err(QueryCompileError::UnknownEffectType(name.to_string()));
        }
    }
    Ok(result)
}

/// Returns the default set of coding effect types used for the coding bin.
pub fn default_coding_effect_types() -> Vec<String> {
    CODING.iter().map(|x| x.to_string()).collect()
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
