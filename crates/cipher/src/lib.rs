//! Salsa20 stream cipher, 20 rounds, 8-byte nonce.
//!
//! GT7 encrypts every telemetry datagram with Salsa20 keyed by a fixed
//! string and a per-packet nonce carried inside the datagram itself. The
//! whole frame is decrypted in one call; there is no streaming use. Kept
//! dependency-free on purpose.

const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574]; // "expand 32-byte k"

/// Keystream generator. XOR is its own inverse, so `apply_keystream` both
/// encrypts and decrypts.
pub struct Salsa20 {
    state: [u32; 16],
    block: [u8; 64],
    used: usize,
}

impl Salsa20 {
    pub fn new(key: &[u8; 32], nonce: &[u8; 8]) -> Self {
        let mut state = [0u32; 16];
        state[0] = SIGMA[0];
        state[5] = SIGMA[1];
        state[10] = SIGMA[2];
        state[15] = SIGMA[3];
        for i in 0..4 {
            state[1 + i] = u32::from_le_bytes(key[i * 4..i * 4 + 4].try_into().unwrap());
            state[11 + i] = u32::from_le_bytes(key[16 + i * 4..16 + i * 4 + 4].try_into().unwrap());
        }
        state[6] = u32::from_le_bytes(nonce[0..4].try_into().unwrap());
        state[7] = u32::from_le_bytes(nonce[4..8].try_into().unwrap());
        // block counter (state[8], state[9]) starts at zero
        Self { state, block: [0u8; 64], used: 64 }
    }

    /// XOR the keystream into `buf`, continuing from wherever the previous
    /// call left off.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            if self.used == 64 {
                self.refill();
            }
            *b ^= self.block[self.used];
            self.used += 1;
        }
    }

    fn refill(&mut self) {
        let mut x = self.state;
        for _ in 0..10 {
            // column round
            quarter_round(&mut x, 0, 4, 8, 12);
            quarter_round(&mut x, 5, 9, 13, 1);
            quarter_round(&mut x, 10, 14, 2, 6);
            quarter_round(&mut x, 15, 3, 7, 11);
            // row round
            quarter_round(&mut x, 0, 1, 2, 3);
            quarter_round(&mut x, 5, 6, 7, 4);
            quarter_round(&mut x, 10, 11, 8, 9);
            quarter_round(&mut x, 15, 12, 13, 14);
        }
        for i in 0..16 {
            let word = x[i].wrapping_add(self.state[i]);
            self.block[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        // 64-bit little-endian counter across words 8 and 9
        let counter = (self.state[8] as u64 | (self.state[9] as u64) << 32).wrapping_add(1);
        self.state[8] = counter as u32;
        self.state[9] = (counter >> 32) as u32;
        self.used = 0;
    }
}

#[inline]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[b] ^= x[a].wrapping_add(x[d]).rotate_left(7);
    x[c] ^= x[b].wrapping_add(x[a]).rotate_left(9);
    x[d] ^= x[c].wrapping_add(x[b]).rotate_left(13);
    x[a] ^= x[d].wrapping_add(x[c]).rotate_left(18);
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
    const NONCE: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn quarter_round_reference_vector() {
        // From the Salsa20 specification examples.
        let mut x = [0u32; 16];
        x[0] = 0x0000_0001;
        quarter_round(&mut x, 0, 1, 2, 3);
        assert_eq!(x[0], 0x0800_8145);
        assert_eq!(x[1], 0x0000_0080);
        assert_eq!(x[2], 0x0001_0200);
        assert_eq!(x[3], 0x2050_0000);
    }

    #[test]
    fn keystream_is_involutive() {
        let plain: Vec<u8> = (0..296u16).map(|i| (i % 251) as u8).collect();
        let mut buf = plain.clone();
        Salsa20::new(&KEY, &NONCE).apply_keystream(&mut buf);
        assert_ne!(buf, plain);
        Salsa20::new(&KEY, &NONCE).apply_keystream(&mut buf);
        assert_eq!(buf, plain);
    }

    #[test]
    fn split_application_matches_single_call() {
        let mut whole = vec![0u8; 200];
        Salsa20::new(&KEY, &NONCE).apply_keystream(&mut whole);

        let mut parts = vec![0u8; 200];
        let mut cipher = Salsa20::new(&KEY, &NONCE);
        cipher.apply_keystream(&mut parts[..64]);
        cipher.apply_keystream(&mut parts[64..100]);
        cipher.apply_keystream(&mut parts[100..]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn nonce_changes_keystream() {
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        Salsa20::new(&KEY, &NONCE).apply_keystream(&mut a);
        Salsa20::new(&KEY, &[9, 2, 3, 4, 5, 6, 7, 8]).apply_keystream(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn key_changes_keystream() {
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        let mut other = KEY;
        other[31] ^= 0xFF;
        Salsa20::new(&KEY, &NONCE).apply_keystream(&mut a);
        Salsa20::new(&other, &NONCE).apply_keystream(&mut b);
        assert_ne!(a, b);
    }
}
