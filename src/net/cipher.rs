use std::sync::OnceLock;

use rand::RngCore;

pub const PC_VECTOR_SIZE: usize = 4;
pub const BB_VECTOR_SIZE: usize = 48;

const PC_STREAM_WORDS: usize = 57;
const BB_SUBKEY_WORDS: usize = 18;
const BB_SBOX_WORDS: usize = 256;

/// Keystream cipher used by the PATCH and DATA roles. The key table is the
/// client's 55-lag subtractive generator; one 32-bit key is consumed per
/// 4-byte word of traffic, so encrypt and decrypt are the same operation.
#[derive(Debug, Clone)]
pub struct PcCipher {
    vector: [u8; PC_VECTOR_SIZE],
    keys: [u32; PC_STREAM_WORDS],
    pos: usize,
}

impl PcCipher {
    pub fn new(seed: u32) -> Self {
        let mut cipher = PcCipher {
            vector: seed.to_le_bytes(),
            keys: [0; PC_STREAM_WORDS],
            pos: PC_STREAM_WORDS - 1,
        };
        cipher.create_keys(seed);
        cipher
    }

    pub fn from_random() -> Self {
        Self::new(rand::thread_rng().next_u32())
    }

    pub fn vector(&self) -> &[u8; PC_VECTOR_SIZE] {
        &self.vector
    }

    fn create_keys(&mut self, seed: u32) {
        let mut high: u32 = 1;
        let mut low: u32 = seed;
        self.keys[56] = seed;
        self.keys[55] = seed;
        let mut step: u32 = 0x15;
        while step <= 0x46e {
            let idx = (step % 55) as usize;
            low = low.wrapping_sub(high);
            step += 0x15;
            self.keys[idx] = high;
            high = low;
            low = self.keys[idx];
        }
        for _ in 0..4 {
            self.mix();
        }
        self.pos = PC_STREAM_WORDS - 1;
    }

    fn mix(&mut self) {
        for i in 1..=24 {
            self.keys[i] = self.keys[i].wrapping_sub(self.keys[i + 31]);
        }
        for i in 25..=55 {
            self.keys[i] = self.keys[i].wrapping_sub(self.keys[i - 24]);
        }
    }

    pub fn next_key(&mut self) -> u32 {
        if self.pos == PC_STREAM_WORDS - 1 {
            self.mix();
            self.pos = 1;
        }
        let key = self.keys[self.pos];
        self.pos += 1;
        key
    }

    fn crypt(&mut self, data: &mut [u8]) {
        let mut chunks = data.chunks_exact_mut(4);
        for chunk in &mut chunks {
            let key = self.next_key().to_le_bytes();
            for (byte, key_byte) in chunk.iter_mut().zip(key.iter()) {
                *byte ^= key_byte;
            }
        }
        let tail = chunks.into_remainder();
        if !tail.is_empty() {
            let key = self.next_key().to_le_bytes();
            for (byte, key_byte) in tail.iter_mut().zip(key.iter()) {
                *byte ^= key_byte;
            }
        }
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.crypt(data);
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.crypt(data);
    }
}

/// Block cipher used by the LOGIN and CHARACTER roles: an 18-subkey,
/// four-S-box Feistel over 8-byte blocks, keyed per session from a 48-byte
/// vector folded into the shared base schedule.
#[derive(Clone)]
pub struct BbCipher {
    vector: [u8; BB_VECTOR_SIZE],
    subkeys: [u32; BB_SUBKEY_WORDS],
    sboxes: [[u32; BB_SBOX_WORDS]; 4],
}

/// The client ships its starting schedule as an opaque constant table; the
/// table here is derived once from the PC keystream generator and acts as
/// that constant. Per-session vectors are folded in by `create_keys`.
fn base_schedule() -> &'static ([u32; BB_SUBKEY_WORDS], [[u32; BB_SBOX_WORDS]; 4]) {
    static SCHEDULE: OnceLock<([u32; BB_SUBKEY_WORDS], [[u32; BB_SBOX_WORDS]; 4])> =
        OnceLock::new();
    SCHEDULE.get_or_init(|| {
        let mut generator = PcCipher::new(0x1c9b_0452);
        let mut subkeys = [0u32; BB_SUBKEY_WORDS];
        for word in subkeys.iter_mut() {
            *word = generator.next_key();
        }
        let mut sboxes = [[0u32; BB_SBOX_WORDS]; 4];
        for sbox in sboxes.iter_mut() {
            for word in sbox.iter_mut() {
                *word = generator.next_key();
            }
        }
        (subkeys, sboxes)
    })
}

impl BbCipher {
    pub fn new(vector: [u8; BB_VECTOR_SIZE]) -> Self {
        let (subkeys, sboxes) = base_schedule();
        let mut cipher = BbCipher {
            vector,
            subkeys: *subkeys,
            sboxes: *sboxes,
        };
        cipher.create_keys();
        cipher
    }

    pub fn from_random() -> Self {
        let mut vector = [0u8; BB_VECTOR_SIZE];
        rand::thread_rng().fill_bytes(&mut vector);
        Self::new(vector)
    }

    pub fn vector(&self) -> &[u8; BB_VECTOR_SIZE] {
        &self.vector
    }

    fn create_keys(&mut self) {
        let mut salt = self.vector;
        for group in salt.chunks_exact_mut(3) {
            group[0] ^= 0x19;
            group[1] ^= 0x16;
            group[2] ^= 0x18;
        }
        for (i, subkey) in self.subkeys.iter_mut().enumerate() {
            let at = (i * 4) % BB_VECTOR_SIZE;
            let word =
                u32::from_le_bytes([salt[at], salt[at + 1], salt[at + 2], salt[at + 3]]);
            *subkey ^= word;
        }

        // Self-encrypting expansion over the whole schedule.
        let mut left = 0u32;
        let mut right = 0u32;
        for i in (0..BB_SUBKEY_WORDS).step_by(2) {
            (left, right) = self.encrypt_block(left, right);
            self.subkeys[i] = left;
            self.subkeys[i + 1] = right;
        }
        for sbox in 0..4 {
            for i in (0..BB_SBOX_WORDS).step_by(2) {
                (left, right) = self.encrypt_block(left, right);
                self.sboxes[sbox][i] = left;
                self.sboxes[sbox][i + 1] = right;
            }
        }
    }

    fn feistel(&self, x: u32) -> u32 {
        let a = self.sboxes[0][(x >> 24) as usize];
        let b = self.sboxes[1][((x >> 16) & 0xff) as usize];
        let c = self.sboxes[2][((x >> 8) & 0xff) as usize];
        let d = self.sboxes[3][(x & 0xff) as usize];
        (a.wrapping_add(b) ^ c).wrapping_add(d)
    }

    fn encrypt_block(&self, mut left: u32, mut right: u32) -> (u32, u32) {
        left ^= self.subkeys[0];
        right ^= self.feistel(left) ^ self.subkeys[1];
        left ^= self.feistel(right) ^ self.subkeys[2];
        right ^= self.feistel(left) ^ self.subkeys[3];
        left ^= self.feistel(right) ^ self.subkeys[4];
        right ^= self.subkeys[5];
        (left, right)
    }

    fn decrypt_block(&self, mut left: u32, mut right: u32) -> (u32, u32) {
        right ^= self.subkeys[5];
        left ^= self.feistel(right) ^ self.subkeys[4];
        right ^= self.feistel(left) ^ self.subkeys[3];
        left ^= self.feistel(right) ^ self.subkeys[2];
        right ^= self.feistel(left) ^ self.subkeys[1];
        left ^= self.subkeys[0];
        (left, right)
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        debug_assert!(data.len() % 8 == 0, "BB cipher buffers are 8-byte aligned");
        for block in data.chunks_exact_mut(8) {
            let left = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
            let right = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
            let (left, right) = self.encrypt_block(left, right);
            block[..4].copy_from_slice(&left.to_le_bytes());
            block[4..].copy_from_slice(&right.to_le_bytes());
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        debug_assert!(data.len() % 8 == 0, "BB cipher buffers are 8-byte aligned");
        for block in data.chunks_exact_mut(8) {
            let left = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
            let right = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
            let (left, right) = self.decrypt_block(left, right);
            block[..4].copy_from_slice(&left.to_le_bytes());
            block[4..].copy_from_slice(&right.to_le_bytes());
        }
    }
}

/// One direction of a session's traffic; the variant matches the role's
/// header family.
#[derive(Clone)]
pub enum Cipher {
    Pc(PcCipher),
    Bb(BbCipher),
}

impl Cipher {
    pub fn vector(&self) -> &[u8] {
        match self {
            Cipher::Pc(cipher) => cipher.vector(),
            Cipher::Bb(cipher) => cipher.vector(),
        }
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        match self {
            Cipher::Pc(cipher) => cipher.encrypt(data),
            Cipher::Bb(cipher) => cipher.encrypt(data),
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        match self {
            Cipher::Pc(cipher) => cipher.decrypt(data),
            Cipher::Bb(cipher) => cipher.decrypt(data),
        }
    }
}
