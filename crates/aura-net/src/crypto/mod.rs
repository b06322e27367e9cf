mod aes_engine;

pub use aes_engine::AesEngine;

use crate::codec::{FLAG_CLEARTEXT, FLAG_OFFSET};

pub const BLOCK_LEN: usize = 16;
pub const KEY_LEN: usize = 16;

pub type Block = [u8; BLOCK_LEN];
pub type CipherKey = [u8; KEY_LEN];

/// Key shared with the client, used for both directions
pub const DEFAULT_CIPHER_KEY: CipherKey = [
    0x8F, 0xCA, 0x2D, 0x32, 0x7C, 0x50, 0xEA, 0xE1, 0xB1, 0x09, 0xD0, 0x94, 0x7E, 0x64, 0xAD, 0x3C,
];

/// Bytes after the last full block are xored with this mask
pub const REMAINDER_MASK: Block = [
    0xFE, 0xDC, 0xBA, 0x98, 0x76, 0x54, 0x32, 0x10, 0x0F, 0x1E, 0x2D, 0x3C, 0x4B, 0x5A, 0x69, 0x78,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptDirection {
    Encrypt,
    Decrypt,
}

/// Keyed 128 bit block transform, configured once for one direction
pub trait BlockEngine: Send + Sync {
    fn init(direction: CryptDirection, key: &CipherKey) -> Self
    where
        Self: Sized;

    /// Transforms one block in place, must not keep state between calls
    fn process_block(&self, block: &mut Block);
}

/// Reverses the byte order of every 32 bit word in the block
fn swap_words(block: &mut Block) {
    for word in block.chunks_exact_mut(4) {
        word.reverse();
    }
}

/// Packet cipher, every connection owns one.
///
/// Full blocks go through the block engine, the client treats them as
/// big endian words so the byte order is swapped around the engine call.
/// Any remainder shorter than a block is xored with `REMAINDER_MASK`.
/// Packets flagged with `FLAG_CLEARTEXT` are left untouched.
pub struct AuraCipher<E = AesEngine> {
    encrypt: E,
    decrypt: E,
}

impl Default for AuraCipher<AesEngine> {
    fn default() -> Self {
        Self::new(&DEFAULT_CIPHER_KEY)
    }
}

impl<E: BlockEngine> AuraCipher<E> {
    pub fn new(key: &CipherKey) -> Self {
        Self {
            encrypt: E::init(CryptDirection::Encrypt, key),
            decrypt: E::init(CryptDirection::Decrypt, key),
        }
    }

    /// Encrypts `packet[offset..offset + count]` for sending
    pub fn encrypt(&self, packet: &mut [u8], offset: usize, count: usize) {
        Self::crypt(&self.encrypt, packet, offset, count)
    }

    /// Decrypts `packet[offset..offset + count]` after receiving
    pub fn decrypt(&self, packet: &mut [u8], offset: usize, count: usize) {
        Self::crypt(&self.decrypt, packet, offset, count)
    }

    fn crypt(engine: &E, packet: &mut [u8], offset: usize, count: usize) {
        if packet.get(FLAG_OFFSET) == Some(&FLAG_CLEARTEXT) {
            return;
        }

        let mut blocks = packet[offset..offset + count].chunks_exact_mut(BLOCK_LEN);
        let mut tmp = Block::default();
        for block in &mut blocks {
            tmp.copy_from_slice(block);
            swap_words(&mut tmp);
            engine.process_block(&mut tmp);
            swap_words(&mut tmp);
            block.copy_from_slice(&tmp);
        }

        for (b, mask) in blocks.into_remainder().iter_mut().zip(REMAINDER_MASK) {
            *b ^= mask;
        }
    }
}
