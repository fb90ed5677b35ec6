//! Slot hash chain and polling sequencer
//!
//! A slot is a position in a one-way SHA-256 chain, hex-encoded for use in
//! network addresses. Each message consumes exactly one slot; because the
//! chain only runs forward, stored state cannot reveal the addresses of
//! past messages once their slots are consumed.

use std::collections::VecDeque;

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of bytes in a raw slot value (SHA-256 output)
pub const SLOT_SIZE: usize = 32;

/// Error for malformed slot values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSlot(pub String);

impl std::fmt::Display for InvalidSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid slot value: {}", self.0)
    }
}

impl std::error::Error for InvalidSlot {}

fn decode_slot(slot: &str) -> Result<[u8; SLOT_SIZE], InvalidSlot> {
    let bytes = hex::decode(slot).map_err(|_| InvalidSlot(slot.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| InvalidSlot(slot.to_string()))
}

fn advance(slot: &[u8; SLOT_SIZE]) -> [u8; SLOT_SIZE] {
    let digest = Sha256::digest(slot);
    digest.into()
}

/// Derive the successor of a slot by hashing it
pub fn next_slot(slot: &str) -> Result<String, InvalidSlot> {
    let bytes = decode_slot(slot)?;
    Ok(hex::encode(advance(&bytes)))
}

/// Generate a fresh random chain seed
pub fn random_slot() -> String {
    let mut bytes = [0u8; SLOT_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Polling sequencer over the slot chain
///
/// Hands out up to `look_ahead` outstanding slots past the committed
/// cursor without side effects; `commit` marks a slot consumed and the
/// cursor advances over the contiguous consumed prefix. Only the cursor is
/// persisted (by the caller, via `committed()`); the look-ahead window is
/// recomputed from it. The cursor never moves backwards.
pub struct SlotSequencer {
    /// Chain positions from the committed cursor onward, with consumed flag
    window: VecDeque<([u8; SLOT_SIZE], bool)>,
    /// Number of slots handed out and not yet consumed-and-advanced past
    handed: usize,
    look_ahead: usize,
}

impl SlotSequencer {
    pub fn new(committed: &str, look_ahead: usize) -> Result<Self, InvalidSlot> {
        let seed = decode_slot(committed)?;
        let mut window = VecDeque::new();
        window.push_back((seed, false));
        Ok(Self {
            window,
            handed: 0,
            look_ahead,
        })
    }

    /// Next slot to poll, or `None` once the look-ahead window is exhausted
    ///
    /// Has no side effects beyond extending the in-memory window.
    pub fn next(&mut self) -> Option<String> {
        if self.handed >= self.look_ahead {
            return None;
        }
        while self.window.len() <= self.handed {
            let last = self.window.back().map(|(s, _)| *s)?;
            self.window.push_back((advance(&last), false));
        }
        let slot = self.window[self.handed].0;
        self.handed += 1;
        Some(hex::encode(slot))
    }

    /// Mark a previously handed-out slot consumed
    ///
    /// The committed cursor advances over the contiguous consumed prefix,
    /// so out-of-order consumption inside the window is tolerated.
    pub fn commit(&mut self, slot: &str) {
        let Ok(bytes) = decode_slot(slot) else {
            return;
        };
        if let Some(entry) = self.window.iter_mut().find(|(s, _)| *s == bytes) {
            entry.1 = true;
        }

        while self.window.front().is_some_and(|(_, consumed)| *consumed) {
            let (consumed_slot, _) = self.window.pop_front().unwrap_or(([0; SLOT_SIZE], true));
            if self.window.is_empty() {
                self.window.push_back((advance(&consumed_slot), false));
            }
            self.handed = self.handed.saturating_sub(1);
        }
    }

    /// The committed cursor: the first slot not yet consumed
    pub fn committed(&self) -> String {
        self.window
            .front()
            .map(|(s, _)| hex::encode(s))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SEED: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_chain_is_deterministic() {
        let a = next_slot(SEED).unwrap();
        let b = next_slot(SEED).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, SEED);
    }

    #[test]
    fn test_chain_collision_free_over_ten_thousand_slots() {
        let mut seen = HashSet::new();
        let mut slot = SEED.to_string();
        for _ in 0..10_000 {
            assert!(seen.insert(slot.clone()), "chain produced a duplicate slot");
            slot = next_slot(&slot).unwrap();
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_invalid_slot_rejected() {
        assert!(next_slot("zz").is_err());
        assert!(next_slot("abcd").is_err());
        assert!(SlotSequencer::new("not-hex", 6).is_err());
    }

    #[test]
    fn test_random_slots_differ() {
        assert_ne!(random_slot(), random_slot());
    }

    #[test]
    fn test_sequencer_hands_out_chain_in_order() {
        let mut seq = SlotSequencer::new(SEED, 3).unwrap();
        let first = seq.next().unwrap();
        let second = seq.next().unwrap();

        assert_eq!(first, SEED);
        assert_eq!(second, next_slot(SEED).unwrap());
    }

    #[test]
    fn test_sequencer_look_ahead_bound() {
        let mut seq = SlotSequencer::new(SEED, 2).unwrap();
        assert!(seq.next().is_some());
        assert!(seq.next().is_some());
        assert!(seq.next().is_none(), "look-ahead window should be exhausted");
    }

    #[test]
    fn test_commit_advances_cursor() {
        let mut seq = SlotSequencer::new(SEED, 6).unwrap();
        let first = seq.next().unwrap();
        seq.commit(&first);

        assert_eq!(seq.committed(), next_slot(SEED).unwrap());
    }

    #[test]
    fn test_commit_frees_look_ahead_capacity() {
        let mut seq = SlotSequencer::new(SEED, 2).unwrap();
        let first = seq.next().unwrap();
        let _second = seq.next().unwrap();
        assert!(seq.next().is_none());

        seq.commit(&first);
        assert!(seq.next().is_some(), "consuming the head should free capacity");
    }

    #[test]
    fn test_out_of_order_commit_waits_for_prefix() {
        let mut seq = SlotSequencer::new(SEED, 6).unwrap();
        let first = seq.next().unwrap();
        let second = seq.next().unwrap();

        // Consuming the second slot alone must not move the cursor
        seq.commit(&second);
        assert_eq!(seq.committed(), first);

        // Once the first is consumed the cursor jumps over both
        seq.commit(&first);
        assert_eq!(seq.committed(), next_slot(&second).unwrap());
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let mut seq = SlotSequencer::new(SEED, 6).unwrap();
        let first = seq.next().unwrap();
        seq.commit(&first);
        let cursor = seq.committed();

        // Committing an already-consumed slot again changes nothing
        seq.commit(&first);
        assert_eq!(seq.committed(), cursor);
    }

    #[test]
    fn test_restart_recomputes_window_from_cursor() {
        let mut seq = SlotSequencer::new(SEED, 6).unwrap();
        let first = seq.next().unwrap();
        seq.commit(&first);

        let mut restarted = SlotSequencer::new(&seq.committed(), 6).unwrap();
        assert_eq!(restarted.next().unwrap(), seq.committed());
    }
}
