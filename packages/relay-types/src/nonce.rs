use serde::{Deserialize, Serialize};

/// Per-user monotonically increasing counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct Nonce(pub u64);

impl Nonce {
    pub const ZERO: Nonce = Nonce(0);

    pub fn next(self) -> Nonce {
        Nonce(self.0 + 1)
    }
}

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Nonce {
    fn from(value: u64) -> Self {
        Nonce(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_strictly_increasing() {
        let n = Nonce::ZERO;
        assert!(n.next() > n);
        assert_eq!(n.next(), Nonce(1));
    }
}
