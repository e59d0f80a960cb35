//! Injectable block cipher capability for the point-to-point payload.
//!
//! The frame codec only needs a 16-byte block permutation; payloads are
//! length-prefixed and zero-padded to the block size before encryption and
//! each block is processed independently.

pub const BLOCK_SIZE: usize = 16;

/// 128-bit block cipher used in ECB fashion by the frame codec
pub trait BlockCipher: Send {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
}

/// Encrypt `data` in place; `data.len()` must be a multiple of [`BLOCK_SIZE`]
pub(crate) fn encrypt_blocks(cipher: &dyn BlockCipher, data: &mut [u8]) {
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        if let Ok(block) = <&mut [u8; BLOCK_SIZE]>::try_from(chunk) {
            cipher.encrypt_block(block);
        }
    }
}

/// Decrypt `data` in place; `data.len()` must be a multiple of [`BLOCK_SIZE`]
pub(crate) fn decrypt_blocks(cipher: &dyn BlockCipher, data: &mut [u8]) {
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        if let Ok(block) = <&mut [u8; BLOCK_SIZE]>::try_from(chunk) {
            cipher.decrypt_block(block);
        }
    }
}

#[cfg(feature = "crypto")]
pub use aes_impl::Aes128Cipher;

#[cfg(feature = "crypto")]
mod aes_impl {
    use super::{BlockCipher, BLOCK_SIZE};
    use aes::Aes128;
    use cipher::generic_array::GenericArray;
    use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
    use zeroize::Zeroizing;

    /// AES-128 block cipher
    pub struct Aes128Cipher {
        inner: Aes128,
    }

    impl Aes128Cipher {
        pub fn new(key: &Zeroizing<[u8; 16]>) -> Self {
            Self {
                inner: Aes128::new(GenericArray::from_slice(key.as_slice())),
            }
        }
    }

    impl BlockCipher for Aes128Cipher {
        fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
            self.inner
                .encrypt_block(GenericArray::from_mut_slice(block.as_mut_slice()));
        }

        fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
            self.inner
                .decrypt_block(GenericArray::from_mut_slice(block.as_mut_slice()));
        }
    }

}

/// Build the configured cipher from a parsed key
#[cfg(feature = "crypto")]
pub fn from_key(
    key: &zeroize::Zeroizing<[u8; 16]>,
) -> Result<Box<dyn BlockCipher>, crate::error::LinkError> {
    Ok(Box::new(Aes128Cipher::new(key)))
}

/// Build the configured cipher from a parsed key
#[cfg(not(feature = "crypto"))]
pub fn from_key(
    _key: &zeroize::Zeroizing<[u8; 16]>,
) -> Result<Box<dyn BlockCipher>, crate::error::LinkError> {
    Err(crate::error::LinkError::Cipher(
        "cipher_key requires the `crypto` feature".to_string(),
    ))
}
