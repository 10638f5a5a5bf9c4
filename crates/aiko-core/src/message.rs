//! Exchange message text.
//!
//! Every hop carries a single line of the form `message #<n>` where `n` is
//! a non-negative decimal counter. Parsing is strict: a missing `#`, an
//! unexpected prefix, a sign, or a non-digit counter is rejected rather than
//! coerced.

use crate::error::RelayError;
use std::fmt;
use std::str::FromStr;

const PREFIX: &str = "message";

/// One hop of the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeMessage(u64);

impl ExchangeMessage {
    /// Message with the given counter
    #[must_use]
    pub const fn new(counter: u64) -> Self {
        Self(counter)
    }

    /// The opening message, counter 0
    #[must_use]
    pub const fn first() -> Self {
        Self(0)
    }

    /// Counter value
    #[must_use]
    pub const fn counter(self) -> u64 {
        self.0
    }

    /// Next hop, `None` at `u64::MAX`
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Parse `message #<n>`
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedMessage` if the text does not have the
    /// expected shape or the counter is not a non-negative integer.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let malformed = |reason: String| RelayError::MalformedMessage {
            message: text.to_string(),
            reason,
        };

        let (prefix, counter) = text
            .split_once('#')
            .ok_or_else(|| malformed("missing '#' before the counter".to_string()))?;
        if prefix.trim() != PREFIX {
            return Err(malformed(format!("expected '{PREFIX} #<n>'")));
        }

        let counter = counter.trim();
        if counter.is_empty() || !counter.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed(format!(
                "counter '{counter}' is not a non-negative integer"
            )));
        }
        counter
            .parse::<u64>()
            .map(Self)
            .map_err(|_| malformed(format!("counter '{counter}' is out of range")))
    }
}

impl FromStr for ExchangeMessage {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ExchangeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX} #{}", self.0)
    }
}
