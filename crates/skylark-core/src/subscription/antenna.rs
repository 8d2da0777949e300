//! Antenna selector resolution.
//!
//! Operators may name antennas by id or by display name. Names are matched
//! exactly first, then case-insensitively; a name shared by several antennas
//! must be given by id.

use std::collections::BTreeSet;

use skylark_types::event::Antenna;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    NotFound(String),
    Ambiguous(String),
}

impl std::fmt::Display for SelectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectorError::NotFound(s) => {
                write!(f, "unknown antenna: {s} (see `antenna list`)")
            }
            SelectorError::Ambiguous(s) => {
                write!(f, "antenna name is not unique: {s} (use the antenna id)")
            }
        }
    }
}

/// Resolve one selector to an antenna id.
pub fn resolve_one(selector: &str, antennas: &[Antenna]) -> Result<String, SelectorError> {
    let selector = selector.trim();
    if antennas.iter().any(|a| a.id == selector) {
        return Ok(selector.to_string());
    }
    let mut ids: BTreeSet<&str> = antennas
        .iter()
        .filter(|a| a.name.trim() == selector)
        .map(|a| a.id.as_str())
        .collect();
    if ids.is_empty() {
        let lowered = selector.to_lowercase();
        ids = antennas
            .iter()
            .filter(|a| a.name.trim().to_lowercase() == lowered)
            .map(|a| a.id.as_str())
            .collect();
    }
    match ids.len() {
        0 => Err(SelectorError::NotFound(selector.to_string())),
        1 => Ok(ids.into_iter().next().unwrap_or_default().to_string()),
        _ => Err(SelectorError::Ambiguous(selector.to_string())),
    }
}

/// Resolve every selector, stopping at the first failure.
pub fn resolve_all(selectors: &[String], antennas: &[Antenna]) -> Result<Vec<String>, SelectorError> {
    let mut out: Vec<String> = Vec::new();
    for selector in selectors.iter().filter(|s| !s.trim().is_empty()) {
        let id = resolve_one(selector, antennas)?;
        if !out.contains(&id) {
            out.push(id);
        }
    }
    Ok(out)
}

/// Display label for an antenna id: `name (id)` when the name is known.
pub fn label(id: &str, antennas: &[Antenna]) -> String {
    match antennas.iter().find(|a| a.id == id) {
        Some(a) if !a.name.trim().is_empty() => format!("{} ({id})", a.name.trim()),
        _ => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn antennas() -> Vec<Antenna> {
        vec![
            Antenna { id: "a1".into(), name: "Rust".into() },
            Antenna { id: "a2".into(), name: "News".into() },
            Antenna { id: "a3".into(), name: "news".into() },
        ]
    }

    #[test]
    fn resolves_ids_and_names() {
        let list = antennas();
        assert_eq!(resolve_one("a2", &list).unwrap(), "a2");
        assert_eq!(resolve_one("rust", &list).unwrap(), "a1");
        assert_eq!(resolve_one("News", &list).unwrap(), "a2");
    }

    #[test]
    fn reports_ambiguous_and_unknown() {
        let list = antennas();
        assert_eq!(
            resolve_one("NEWS", &list),
            Err(SelectorError::Ambiguous("NEWS".into()))
        );
        assert_eq!(
            resolve_all(&["a1".into(), "nope".into()], &list),
            Err(SelectorError::NotFound("nope".into()))
        );
    }

    #[test]
    fn resolve_all_dedups() {
        let list = antennas();
        let ids = resolve_all(&["a1".into(), "Rust".into()], &list).unwrap();
        assert_eq!(ids, vec!["a1".to_string()]);
        assert_eq!(label("a1", &list), "Rust (a1)");
        assert_eq!(label("zz", &list), "zz");
    }
}
