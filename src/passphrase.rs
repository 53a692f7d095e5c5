//! Passphrase generation and strength scoring.

use std::fmt;
use std::path::Path;

use rand_core::{OsRng, RngCore};
use serde::Serialize;

use crate::error::WordlistError;
use crate::wordlist::Wordlist;

pub const DEFAULT_WORD_COUNT: usize = 6;

/// Separator placed between generated words.
pub const SEPARATOR: char = '-';

/// Below this many bits a passphrase is [`StrengthLabel::Weak`].
pub const OK_FROM_BITS: f64 = 60.0;

/// At or above this many bits a passphrase is [`StrengthLabel::Strong`].
pub const STRONG_FROM_BITS: f64 = 77.0;

/// Map a uniform `u32` source onto `0..n` without modulo bias.
///
/// Draws at or above `floor(2^32 / n) * n` are rejected and redrawn.
///
/// # Panics
///
/// Panics if `n` is zero or exceeds `2^32`.
pub fn uniform_index<R: RngCore + ?Sized>(rng: &mut R, n: usize) -> usize {
    const RANGE: u64 = 1 << 32;
    let n = n as u64;
    assert!(n > 0 && n <= RANGE, "corpus size out of range");

    let limit = (RANGE / n) * n;
    loop {
        let v = u64::from(rng.next_u32());
        if v < limit {
            return (v % n) as usize;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthLabel {
    Weak,
    Ok,
    Strong,
}

impl fmt::Display for StrengthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrengthLabel::Weak => write!(f, "weak"),
            StrengthLabel::Ok => write!(f, "ok"),
            StrengthLabel::Strong => write!(f, "strong"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strength {
    pub label: StrengthLabel,
    pub entropy_bits: f64,
}

impl Strength {
    fn from_bits(entropy_bits: f64) -> Self {
        let label = if entropy_bits >= STRONG_FROM_BITS {
            StrengthLabel::Strong
        } else if entropy_bits >= OK_FROM_BITS {
            StrengthLabel::Ok
        } else {
            StrengthLabel::Weak
        };
        Self { label, entropy_bits }
    }
}

/// Draws human-typable passphrases from a [`Wordlist`].
#[derive(Clone, Debug)]
pub struct PassphraseGenerator {
    wordlist: Wordlist,
}

impl PassphraseGenerator {
    pub fn new(wordlist: Wordlist) -> Self {
        Self { wordlist }
    }

    /// Load the corpus from `path`; fails if it is missing or unusable.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WordlistError> {
        Wordlist::load(path).map(Self::new)
    }

    pub fn bundled() -> Result<Self, WordlistError> {
        Wordlist::bundled().map(Self::new)
    }

    pub fn wordlist(&self) -> &Wordlist {
        &self.wordlist
    }

    /// `word_count` words drawn independently from the OS RNG.
    pub fn generate(&self, word_count: usize) -> String {
        self.generate_with(&mut OsRng, word_count)
    }

    pub fn generate_with<R: RngCore + ?Sized>(&self, rng: &mut R, word_count: usize) -> String {
        let mut out = String::new();
        for i in 0..word_count {
            if i > 0 {
                out.push(SEPARATOR);
            }
            let idx = uniform_index(rng, self.wordlist.len());
            // idx < len by construction
            out.push_str(self.wordlist.get(idx).unwrap_or_default());
        }
        out
    }

    /// `word_count × log2(corpus_size)`, labelled against the fixed thresholds.
    pub fn strength_of(&self, passphrase: &str) -> Strength {
        let words = passphrase
            .split(|c: char| c == SEPARATOR || c == '_' || c.is_whitespace())
            .filter(|w| !w.is_empty())
            .count();
        let bits_per_word = (self.wordlist.len() as f64).log2();
        Strength::from_bits(words as f64 * bits_per_word)
    }
}
