//! Canonical utility names.
//!
//! Callers type utility names by hand ("  coned ", "CONED", "ConEd"), while rate tables key them
//! by a single display form. [`AliasMap::normalize`] folds the variants onto that form before any
//! table lookup.

use std::collections::BTreeMap;

use thiserror::Error;

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("CONED", "ConEd"),
    ("CONED (STATEN ISLAND)", "ConEd (Staten Island)"),
    ("CONED (WESTCHESTER)", "ConEd (Westchester)"),
    ("NGRID", "NGRID"),
    ("CHGE", "CHGE"),
    ("O&R", "O&R"),
    ("NYSEG", "NYSEG"),
    ("RG&E", "RG&E"),
    ("PSEG-LI", "PSEG-LI"),
];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AliasError {
    #[error("alias `{alias}` has an empty canonical name")]
    EmptyCanonical { alias: String },
    #[error(
        "alias `{alias}` maps to `{canonical}`, but `{canonical}` itself normalizes to `{other}`"
    )]
    NotIdempotent { alias: String, canonical: String, other: String },
}

/// Upper-cased lookup key to canonical display name.
///
/// Construction rejects maps where a canonical name would normalize to something else, so
/// `normalize(normalize(x)) == normalize(x)` holds for every input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasMap {
    entries: BTreeMap<String, String>,
}

impl AliasMap {
    pub fn new<I, K, V>(aliases: I) -> Result<Self, AliasError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut entries = BTreeMap::new();
        for (alias, canonical) in aliases {
            let canonical = canonical.into().trim().to_string();
            if canonical.is_empty() {
                return Err(AliasError::EmptyCanonical { alias: alias.as_ref().to_string() });
            }
            entries.insert(lookup_key(alias.as_ref()), canonical);
        }

        let canonicals: Vec<(String, String)> =
            entries.iter().map(|(alias, canonical)| (alias.clone(), canonical.clone())).collect();
        for (alias, canonical) in canonicals {
            let self_key = lookup_key(&canonical);
            match entries.get(&self_key) {
                Some(other) if *other != canonical => {
                    return Err(AliasError::NotIdempotent { alias, canonical, other: other.clone() });
                }
                Some(_) => {}
                None => {
                    entries.insert(self_key, canonical);
                }
            }
        }

        Ok(Self { entries })
    }

    pub fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return raw.to_string();
        }

        match self.entries.get(&trimmed.to_uppercase()) {
            Some(canonical) => canonical.clone(),
            None => trimmed.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AliasMap {
    fn default() -> Self {
        let entries = DEFAULT_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();
        Self { entries }
    }
}

fn lookup_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}
