//! Symmetric stream transforms.
//!
//! Both are self-inverse: applying the same transform with the same key
//! twice yields the original bytes. Neither offers real confidentiality.

use crate::errors::{CodecError, Result};

/// XOR `data` against `key` repeated cyclically.
pub fn xor(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.is_empty() {
        return Err(CodecError::EmptyKey);
    }
    Ok(data
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect())
}

/// RC4 keystream generator.
///
/// Each instance keeps its own state; one instance per message is what the
/// wire format expects.
#[derive(Clone)]
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Run the key schedule. Keys must be 1..=256 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() || key.len() > 256 {
            return Err(CodecError::KeySize(key.len()));
        }
        let mut state = [0u8; 256];
        for (slot, value) in state.iter_mut().zip(0u8..=255) {
            *slot = value;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, usize::from(j));
        }
        Ok(Self { state, i: 0, j: 0 })
    }

    /// XOR `buf` in place with the next bytes of keystream.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[usize::from(self.i)]);
            self.state.swap(usize::from(self.i), usize::from(self.j));
            let idx = self.state[usize::from(self.i)].wrapping_add(self.state[usize::from(self.j)]);
            *byte ^= self.state[usize::from(idx)];
        }
    }
}

impl std::fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}

/// One-shot RC4 over `data` with a fresh key schedule.
pub fn rc4(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = Rc4::new(key)?;
    let mut out = data.to_vec();
    cipher.apply(&mut out);
    Ok(out)
}
