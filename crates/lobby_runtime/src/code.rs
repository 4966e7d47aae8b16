//! Join code generation.

use lobby_types::{LobbyCode, DEFAULT_CODE_ALPHABET, DEFAULT_CODE_LENGTH};
use rand::Rng;

/// Draws random join codes from a fixed alphabet.
///
/// Uniqueness is not this type's concern; the manager rejects codes that
/// collide with a live lobby and draws again.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl CodeGenerator {
    /// Builds a generator. The alphabet is uppercased and deduplicated; an empty
    /// alphabet or zero length falls back to the defaults.
    pub fn new(alphabet: &str, length: usize) -> Self {
        let mut chars: Vec<char> = Vec::new();
        for c in alphabet.chars().flat_map(char::to_uppercase) {
            if !c.is_whitespace() && !chars.contains(&c) {
                chars.push(c);
            }
        }
        if chars.is_empty() {
            chars = DEFAULT_CODE_ALPHABET.chars().collect();
        }

        Self {
            alphabet: chars,
            length: if length == 0 { DEFAULT_CODE_LENGTH } else { length },
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of distinct codes this generator can produce, saturating.
    pub fn space(&self) -> u64 {
        (self.alphabet.len() as u64).saturating_pow(self.length.min(u32::MAX as usize) as u32)
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> LobbyCode {
        let raw: String = (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect();
        LobbyCode::new(raw)
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_ALPHABET, DEFAULT_CODE_LENGTH)
    }
}
