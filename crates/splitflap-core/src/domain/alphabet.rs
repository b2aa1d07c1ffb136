//! The set of symbols a splitflap device can show, and text validation
//! against it.

use thiserror::Error;

/// Character shown by an empty flap.
pub const BLANK: char = ' ';

/// Largest alphabet that still fits one flap index per byte.
pub const MAX_ALPHABET_LEN: usize = 256;

/// Errors raised when building an [`Alphabet`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlphabetError {
    #[error("alphabet is empty")]
    Empty,
    #[error("alphabet has {len} symbols; at most {MAX_ALPHABET_LEN} are addressable")]
    TooLarge { len: usize },
    #[error("symbol {0:?} appears more than once")]
    DuplicateSymbol(char),
}

/// Reasons a text cannot be shown on the display.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Module count and alphabet have not been learned from the device yet.
    #[error("device capabilities are not known yet")]
    CapabilitiesUnknown,

    #[error("text has {actual} characters but the display has {expected} modules")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("character {ch:?} at position {position} is not in the device alphabet")]
    UnsupportedCharacter { ch: char, position: usize },
}

/// Ordered, duplicate-free list of flap symbols.
///
/// A symbol's position is the flap index sent to the device.
///
/// # Examples
///
/// ```rust
/// use splitflap_core::Alphabet;
///
/// let alphabet = Alphabet::new(" abc".chars()).unwrap();
/// assert_eq!(alphabet.index_of('b'), Some(2));
/// assert!(alphabet.has_blank());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Alphabet {
    /// Builds an alphabet from symbols in flap order.
    ///
    /// # Errors
    ///
    /// Returns [`AlphabetError`] if the list is empty, longer than
    /// [`MAX_ALPHABET_LEN`], or contains a symbol twice.
    pub fn new(symbols: impl IntoIterator<Item = char>) -> Result<Self, AlphabetError> {
        let symbols: Vec<char> = symbols.into_iter().collect();
        if symbols.is_empty() {
            return Err(AlphabetError::Empty);
        }
        if symbols.len() > MAX_ALPHABET_LEN {
            return Err(AlphabetError::TooLarge { len: symbols.len() });
        }
        for (i, c) in symbols.iter().enumerate() {
            if symbols[..i].contains(c) {
                return Err(AlphabetError::DuplicateSymbol(*c));
            }
        }
        Ok(Self { symbols })
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, ch: char) -> bool {
        self.symbols.contains(&ch)
    }

    pub fn has_blank(&self) -> bool {
        self.contains(BLANK)
    }

    /// Flap index of `ch`, if the device can show it.
    pub fn index_of(&self, ch: char) -> Option<u8> {
        self.symbols
            .iter()
            .position(|&c| c == ch)
            .map(|i| i as u8)
    }

    /// Symbol at flap index `index`.
    pub fn symbol_at(&self, index: u8) -> Option<char> {
        self.symbols.get(index as usize).copied()
    }

    /// Converts `text` into one flap index per module.
    ///
    /// Nothing is produced unless the whole text is valid.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::LengthMismatch`] when `text` does not have exactly
    /// `num_modules` characters and [`TextError::UnsupportedCharacter`] for
    /// the first character outside the alphabet.
    pub fn encode_text(&self, text: &[char], num_modules: usize) -> Result<Vec<u8>, TextError> {
        if text.len() != num_modules {
            return Err(TextError::LengthMismatch {
                expected: num_modules,
                actual: text.len(),
            });
        }
        text.iter()
            .enumerate()
            .map(|(position, &ch)| {
                self.index_of(ch)
                    .ok_or(TextError::UnsupportedCharacter { ch, position })
            })
            .collect()
    }
}

impl std::fmt::Display for Alphabet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.symbols.iter().try_for_each(|c| write!(f, "{c}"))
    }
}
