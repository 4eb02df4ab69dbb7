//! # Character Vocabulary
//!
//! Ordered symbol table shared by the label codec, the loss and the
//! accuracy evaluator. Index 0 is always the CTC blank.

use std::collections::HashMap;
use std::fmt;

use crate::codec::greedy;
use crate::error::{CaptchaError, Result};

/// Default captcha alphabet: blank, digits, upper-case ASCII letters.
pub const CAPTCHA_ALPHABET: &str = "-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Index of the blank symbol in every vocabulary.
pub const BLANK_INDEX: u32 = 0;

/// Filler character stripped from decoded targets.
const PADDING: char = ' ';

/// Fixed, ordered set of symbols with the blank at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    symbols: Vec<char>,
    char_to_idx: HashMap<char, u32>,
}

impl Vocabulary {
    /// Builds a vocabulary from an alphabet whose first character is the blank.
    ///
    /// # Errors
    /// Fails when the alphabet has no symbol besides the blank, or when a
    /// symbol appears twice.
    pub fn new(alphabet: &str) -> Result<Self> {
        let symbols: Vec<char> = alphabet.chars().collect();
        if symbols.len() < 2 {
            return Err(CaptchaError::InvalidVocabulary(format!(
                "alphabet {alphabet:?} needs a blank and at least one symbol"
            )));
        }

        let mut char_to_idx = HashMap::with_capacity(symbols.len());
        for (idx, &c) in symbols.iter().enumerate() {
            if char_to_idx.insert(c, idx as u32).is_some() {
                return Err(CaptchaError::InvalidVocabulary(format!(
                    "symbol {c:?} appears more than once"
                )));
            }
        }

        Ok(Self {
            symbols,
            char_to_idx,
        })
    }

    /// The 37-symbol captcha vocabulary (`-0-9A-Z`, blank `-`).
    pub fn captcha() -> Self {
        Self::new(CAPTCHA_ALPHABET).expect("built-in alphabet is valid")
    }

    /// Number of classes, blank included.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false; a vocabulary holds at least the blank and one symbol.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn blank(&self) -> char {
        self.symbols[BLANK_INDEX as usize]
    }

    /// Symbol for a class index.
    pub fn symbol(&self, index: u32) -> Result<char> {
        self.symbols
            .get(index as usize)
            .copied()
            .ok_or(CaptchaError::InvalidIndex {
                index,
                vocabulary_size: self.symbols.len(),
            })
    }

    /// Class index for a symbol, if present.
    pub fn index_of(&self, c: char) -> Option<u32> {
        self.char_to_idx.get(&c).copied()
    }

    /// Encodes a label string into class indices.
    ///
    /// # Errors
    /// `InvalidCharacter` when a character is missing from the vocabulary or
    /// is the blank itself, which can never be part of a target.
    pub fn encode(&self, label: &str) -> Result<Vec<u32>> {
        label
            .chars()
            .map(|c| match self.index_of(c) {
                Some(idx) if idx != BLANK_INDEX => Ok(idx),
                _ => Err(CaptchaError::InvalidCharacter {
                    character: c,
                    label: label.to_string(),
                }),
            })
            .collect()
    }

    /// Rebuilds a ground-truth label from its indices, dropping padding.
    pub fn decode_target(&self, indices: &[u32]) -> Result<String> {
        let mut out = String::with_capacity(indices.len());
        for &idx in indices {
            let c = self.symbol(idx)?;
            if c != PADDING {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// Greedy CTC decoding of a per-timestep argmax sequence.
    ///
    /// See [`greedy::collapse`] for the exact collapse policy.
    pub fn decode_prediction(&self, argmax: &[u32]) -> Result<String> {
        let raw = argmax
            .iter()
            .map(|&idx| self.symbol(idx))
            .collect::<Result<Vec<char>>>()?;
        Ok(greedy::collapse(&raw, self.blank()))
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::captcha()
    }
}

impl fmt::Display for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.symbols {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
