use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

use crate::error::CoreError;

/// Growable bit-vector over 64-bit words. Field-group bit indices are
/// stable identifiers, so the mask must keep working when the registry
/// grows past any fixed word count.
///
/// Invariant: no trailing zero words, so equality is structural.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitMask {
    words: Vec<u64>,
}

impl BitMask {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    pub fn with_bit(bit: usize) -> Self {
        let mut mask = Self::new();
        mask.set(bit);
        mask
    }

    pub fn set(&mut self, bit: usize) {
        let word = bit / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % 64);
    }

    pub fn test(&self, bit: usize) -> bool {
        let word = bit / 64;
        self.words
            .get(word)
            .is_some_and(|w| w & (1u64 << (bit % 64)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// OR the other mask into this one. Never clears a bit.
    pub fn or_with(&mut self, other: &BitMask) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (word, bits) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= bits;
        }
    }

    /// True when every bit of `required` is set in `self`.
    pub fn contains_all(&self, required: &BitMask) -> bool {
        required.words.iter().enumerate().all(|(i, bits)| {
            let have = self.words.get(i).copied().unwrap_or(0);
            have & bits == *bits
        })
    }

    pub fn intersects(&self, other: &BitMask) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Iterate the set bit indices in ascending order.
    pub fn bits(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            (0..64)
                .filter(move |b| word & (1u64 << b) != 0)
                .map(move |b| i * 64 + b)
        })
    }

    /// Hex render of the mask as one big-endian number. Width-stable:
    /// `"5"` parses back to the same mask whether the registry needed
    /// one word or ten when it was written.
    pub fn to_hex(&self) -> String {
        match self.words.split_last() {
            None => "0".to_string(),
            Some((top, rest)) => {
                let mut out = format!("{top:x}");
                for word in rest.iter().rev() {
                    out.push_str(&format!("{word:016x}"));
                }
                out
            }
        }
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::InvalidMask("empty string".to_string()));
        }
        let bytes = s.as_bytes();
        let mut words = Vec::new();
        let mut end = bytes.len();
        while end > 0 {
            let start = end.saturating_sub(16);
            let chunk = std::str::from_utf8(&bytes[start..end])
                .map_err(|_| CoreError::InvalidMask(s.to_string()))?;
            let word = u64::from_str_radix(chunk, 16)
                .map_err(|_| CoreError::InvalidMask(s.to_string()))?;
            words.push(word);
            end = start;
        }
        let mut mask = Self { words };
        mask.normalize();
        Ok(mask)
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl BitOr for &BitMask {
    type Output = BitMask;

    fn bitor(self, rhs: &BitMask) -> BitMask {
        let mut out = self.clone();
        out.or_with(rhs);
        out
    }
}

impl BitAnd for &BitMask {
    type Output = BitMask;

    fn bitand(self, rhs: &BitMask) -> BitMask {
        let words = self
            .words
            .iter()
            .zip(rhs.words.iter())
            .map(|(a, b)| a & b)
            .collect();
        let mut out = BitMask { words };
        out.normalize();
        out
    }
}

impl fmt::Debug for BitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitMask({})", self.to_hex())
    }
}
