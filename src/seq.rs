//! Modular sequence-number space.
//!
//! Confundo sequence and acknowledgment numbers wrap at a small modulus
//! (50 000 by default) rather than at `2^32`, so wrap-around happens even on
//! modest transfers.  All advancing goes through [`SeqSpace::advance`], which
//! keeps every value in `[0, modulus)`.

/// Default modulus of the sequence space.
pub const DEFAULT_MODULUS: u32 = 50_000;

/// Arithmetic over one sequence space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    modulus: u32,
}

impl SeqSpace {
    /// # Panics
    ///
    /// Panics if `modulus` is zero.
    pub fn new(modulus: u32) -> Self {
        assert!(modulus > 0, "sequence modulus must be non-zero");
        Self { modulus }
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    /// Reduce an arbitrary value into the space.
    pub fn normalize(&self, v: u32) -> u32 {
        v % self.modulus
    }

    /// `(v + k) mod modulus`, computed without overflow.
    pub fn advance(&self, v: u32, k: usize) -> u32 {
        let m = u64::from(self.modulus);
        ((u64::from(v) % m + (k as u64) % m) % m) as u32
    }
}

impl Default for SeqSpace {
    fn default() -> Self {
        Self::new(DEFAULT_MODULUS)
    }
}
