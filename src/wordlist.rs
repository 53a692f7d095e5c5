//! Passphrase corpus.

use std::collections::HashSet;
use std::path::Path;

use crate::error::WordlistError;

/// Smallest corpus accepted by [`Wordlist::parse`].
pub const MIN_WORDS: usize = 4096;

/// The 7776-word corpus shipped with the crate.
pub const BUNDLED_WORDLIST: &str = include_str!("../assets/wordlist.txt");

/// An immutable, de-duplicated list of passphrase words.
#[derive(Clone, Debug)]
pub struct Wordlist {
    words: Vec<String>,
}

impl Wordlist {
    /// Parse newline-separated words. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, WordlistError> {
        let mut seen = HashSet::new();
        let mut words = Vec::new();

        for line in text.lines() {
            let word = line.trim();
            if word.is_empty() || word.starts_with('#') {
                continue;
            }
            if word.chars().any(|c| c.is_whitespace() || c == '-' || c == '_') {
                return Err(WordlistError::InvalidWord(word.to_string()));
            }
            if !seen.insert(word) {
                return Err(WordlistError::Duplicate(word.to_string()));
            }
            words.push(word.to_string());
        }

        if words.len() < MIN_WORDS {
            return Err(WordlistError::TooSmall {
                found: words.len(),
                required: MIN_WORDS,
            });
        }
        Ok(Self { words })
    }

    /// Load a corpus from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WordlistError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// The bundled corpus.
    pub fn bundled() -> Result<Self, WordlistError> {
        Self::parse(BUNDLED_WORDLIST)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}
