use aes::Aes128;
use cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};

use super::{Block, BlockEngine, CipherKey, CryptDirection};

/// AES-128 block engine
pub struct AesEngine {
    direction: CryptDirection,
    aes: Aes128,
}

impl std::fmt::Debug for AesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesEngine")
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl BlockEngine for AesEngine {
    fn init(direction: CryptDirection, key: &CipherKey) -> Self {
        Self {
            direction,
            aes: Aes128::new(GenericArray::from_slice(key)),
        }
    }

    fn process_block(&self, block: &mut Block) {
        let block: &mut aes::Block = GenericArray::from_mut_slice(block);
        match self.direction {
            CryptDirection::Encrypt => self.aes.encrypt_block(block),
            CryptDirection::Decrypt => self.aes.decrypt_block(block),
        }
    }
}
