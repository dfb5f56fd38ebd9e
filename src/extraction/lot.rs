use anyhow::{bail, Result};
use regex::Regex;

/// Marker words that introduce a lot code ("LOTTO: L12345", "Lot 0921").
#[derive(Debug, Clone)]
pub struct LotPattern {
    regex: Regex,
}

impl LotPattern {
    /// Builds the pattern from a marker vocabulary. Markers match
    /// case-insensitively and must stand as their own token; a trailing `.`
    /// is allowed so abbreviations like `L.` work. The code itself is the run
    /// of uppercase letters, digits and hyphens right after the marker and an
    /// optional `:` or `.`.
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Result<Self> {
        let mut words: Vec<String> = markers
            .iter()
            .map(|marker| marker.as_ref().trim().trim_end_matches('.').to_string())
            .filter(|marker| !marker.is_empty())
            .collect();
        if words.is_empty() {
            bail!("lot marker vocabulary is empty");
        }

        // Longest first so "lotto" wins over "lot" at the same position.
        words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        words.dedup();

        let alternation = words
            .iter()
            .map(|word| regex::escape(word))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(r"\b(?i:{alternation})(?:\.|\b)\s*[:.]?\s*([A-Z0-9][A-Z0-9-]*)");

        Ok(Self {
            regex: Regex::new(&pattern)?,
        })
    }

    /// First lot code in `text`, if any marker introduces one.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|code| code.as_str())
    }
}
