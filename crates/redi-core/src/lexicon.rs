//! Restoration lexicon: maps a diacritic-free token to its candidate forms
//!
//! On disk a lexicon is a JSON object keyed by lowercase token, each value
//! an object of candidate form to weight:
//!
//! ```text
//! {
//!   "sime":  { "šime": 0.97, "sime": 0.03 },
//!   "cosic": { "ćosić": 1.0 }
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::tokenize::tokenize;
use crate::{Error, Result};

/// Candidate forms of one token with their weights
pub type Candidates = BTreeMap<String, f64>;

/// Per-language restoration model
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    entries: HashMap<String, Candidates>,
}

impl Lexicon {
    /// Load a lexicon from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::ModelNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let entries: HashMap<String, Candidates> = serde_json::from_str(&content)?;

        for (token, candidates) in &entries {
            if candidates.is_empty() {
                return Err(Error::InvalidModel {
                    path: path.to_path_buf(),
                    reason: format!("token {:?} has no candidate forms", token),
                });
            }
            if candidates.values().any(|w| !w.is_finite()) {
                return Err(Error::InvalidModel {
                    path: path.to_path_buf(),
                    reason: format!("token {:?} has a non-finite weight", token),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Build a lexicon from in-memory entries
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Candidates)>,
        K: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Number of tokens in the lexicon
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best candidate form for a lowercase token
    ///
    /// A single candidate wins outright; otherwise the highest weight wins,
    /// ties going to the first form in key order.
    pub fn best_form(&self, token: &str) -> Option<&str> {
        let candidates = self.entries.get(token)?;
        let mut best: Option<(&String, f64)> = None;
        for (form, &weight) in candidates {
            match best {
                Some((_, w)) if weight <= w => {}
                _ => best = Some((form, weight)),
            }
        }
        best.map(|(form, _)| form.as_str())
    }

    /// Restore diacritics on a list of tokens, preserving uppercase positions
    pub fn restore_tokens(&self, tokens: &[String]) -> Vec<String> {
        tokens
            .iter()
            .map(|token| {
                let uppers = upper_positions(token);
                let lower = token.to_lowercase();
                let restored = self.best_form(&lower).unwrap_or(&lower);
                apply_uppers(&uppers, restored)
            })
            .collect()
    }

    /// Tokenize and restore a text; tokens are rejoined with single spaces
    pub fn restore_text(&self, text: &str) -> String {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return text.to_string();
        }
        self.restore_tokens(&tokens).join(" ")
    }

    /// Suggest a corrected form, or `None` when restoration changes nothing
    ///
    /// Spacing differences introduced by tokenization do not count as a change.
    pub fn suggest(&self, name: &str) -> Option<String> {
        let restored = self.restore_text(name);
        if strip_spaces(&restored) != strip_spaces(name) {
            Some(restored)
        } else {
            None
        }
    }
}

fn upper_positions(token: &str) -> HashSet<usize> {
    token
        .chars()
        .enumerate()
        .filter(|(_, c)| c.is_uppercase())
        .map(|(i, _)| i)
        .collect()
}

fn apply_uppers(uppers: &HashSet<usize>, token: &str) -> String {
    if uppers.is_empty() {
        return token.to_string();
    }
    let mut out = String::with_capacity(token.len());
    for (i, c) in token.chars().enumerate() {
        if uppers.contains(&i) {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn strip_spaces(s: &str) -> String {
    s.chars().filter(|c| *c != ' ').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(forms: &[(&str, f64)]) -> Candidates {
        forms.iter().map(|(f, w)| (f.to_string(), *w)).collect()
    }

    fn sample() -> Lexicon {
        Lexicon::from_entries([
            ("sime", candidates(&[("šime", 0.97), ("sime", 0.03)])),
            ("cosic", candidates(&[("ćosić", 1.0)])),
            ("kuca", candidates(&[("kuća", 0.5), ("kuca", 0.5)])),
            ("ivan", candidates(&[("ivan", 1.0)])),
        ])
    }

    #[test]
    fn test_best_form() {
        let lex = sample();
        assert_eq!(lex.best_form("cosic"), Some("ćosić"));
        assert_eq!(lex.best_form("sime"), Some("šime"));
        assert_eq!(lex.best_form("unknown"), None);
    }

    #[test]
    fn test_best_form_tie_uses_key_order() {
        // "kuca" < "kuća" in byte order
        assert_eq!(sample().best_form("kuca"), Some("kuca"));
    }

    #[test]
    fn test_restore_preserves_case() {
        let lex = sample();
        assert_eq!(lex.restore_text("Sime COSIC"), "Šime ĆOSIĆ");
        assert_eq!(lex.restore_text("sIme"), "šIme");
    }

    #[test]
    fn test_restore_keeps_unknown_tokens() {
        assert_eq!(sample().restore_text("Marko Cosic"), "Marko Ćosić");
    }

    #[test]
    fn test_restore_empty_text() {
        assert_eq!(sample().restore_text("   "), "   ");
    }

    #[test]
    fn test_suggest() {
        let lex = sample();
        assert_eq!(lex.suggest("Sime Cosic"), Some("Šime Ćosić".to_string()));
        assert_eq!(lex.suggest("Ivan"), None);
        // punctuation spacing alone is not a correction
        assert_eq!(lex.suggest("Ivan,"), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wikitweetweb.hr.tm");
        std::fs::write(&path, r#"{"cosic": {"ćosić": 1.0}}"#).unwrap();

        let lex = Lexicon::load(&path).unwrap();
        assert_eq!(lex.len(), 1);
        assert_eq!(lex.suggest("Cosic"), Some("Ćosić".to_string()));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wikitweetweb.sl.tm");
        assert!(matches!(Lexicon::load(&path), Err(Error::ModelNotFound(p)) if p == path));
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tm");

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Lexicon::load(&path), Err(Error::Json(_))));

        std::fs::write(&path, r#"{"cosic": {}}"#).unwrap();
        assert!(matches!(Lexicon::load(&path), Err(Error::InvalidModel { .. })));
    }
}
