//! Cipher and MAC (message authentication code) combinations.
//!
//! Each combination bundles the block cipher used for encryption, the MAC and the key derivation
//! function of one PACE cipher suite.


use aes::{Aes128, Aes192, Aes256};
use block_padding::NoPadding;
use cipher::{BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use cipher::generic_array::GenericArray;
use cmac::{Cmac, Mac};
use des::{Des, TdesEde2};
use digest::Digest;
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypt::CryptoError;


/// Length of every MAC handed out by a [`CipherAndMac`].
pub const MAC_LENGTH: usize = 8;


/// A combination of cipher, MAC and KDF (key derivation function) usable during authentication and
/// Secure Messaging.
pub trait CipherAndMac: Sync {
    /// Size of the cipher key in bytes.
    fn cipher_key_size(&self) -> usize;

    /// Block size of the cipher in bytes.
    fn cipher_block_size(&self) -> usize;

    /// Block size to which data is padded before computing an authentication token.
    ///
    /// CMAC pads internally, so the AES-based combinations return 1 here. Secure Messaging always
    /// pads to [`CipherAndMac::cipher_block_size`].
    fn mac_block_size(&self) -> usize;

    /// The key derivation function.
    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>>;

    /// Decrypts data in-place using the given key and CBC IV.
    ///
    /// Does not strip padding.
    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError>;

    /// Encrypts pre-padded data in-place using the given key and CBC IV.
    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError>;

    /// Generates a MAC for the given pre-padded data and key, truncated to [`MAC_LENGTH`] bytes.
    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Derives the CBC IV used by Secure Messaging from the encoded send sequence counter.
    fn sequence_counter_iv(&self, key: &[u8], send_sequence_counter: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verifies whether the given data fits the given MAC in constant time.
    fn verify_mac_padded_data(&self, data: &[u8], key: &[u8], expected_mac: &[u8]) -> Result<bool, CryptoError> {
        let computed_mac = self.mac_padded_data(data, key)?;
        Ok(computed_mac.as_slice().ct_eq(expected_mac).into())
    }
}


fn check_key_length(key: &[u8], expected: usize) -> Result<(), CryptoError> {
    if key.len() != expected {
        return Err(CryptoError::KeyLength { expected, obtained: key.len() });
    }
    Ok(())
}

fn check_block_multiple(data: &[u8], block_size: usize) -> Result<(), CryptoError> {
    if data.len() % block_size != 0 {
        return Err(CryptoError::DataLength { block_size, obtained: data.len() });
    }
    Ok(())
}


/// 3DES-based cipher and MAC.
///
/// 3DES is used in EDE two-key mode:
/// ```plain
/// encrypt((K1, K2), D) = encrypt(K1, decrypt(K2, encrypt(K1, D)))
/// ```
/// The block mode of operation is Cipher Block Chaining (CBC). Secure Messaging uses a zero IV.
///
/// The KDF is equivalent to:
/// ```plain
/// keydata = sha1(key || counter)[0..16]
/// ```
///
/// The MAC is Retail MAC (ISO/IEC 9797-1 algorithm 3) with DES and a zero IV.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Cam3Des;
impl CipherAndMac for Cam3Des {
    fn cipher_key_size(&self) -> usize { 16 }
    fn cipher_block_size(&self) -> usize { 8 }
    fn mac_block_size(&self) -> usize { 8 }

    fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
        let mut hasher = Sha1::new();
        Digest::update(&mut hasher, key_seed);
        Digest::update(&mut hasher, counter.to_be_bytes());
        let result = hasher.finalize();
        Zeroizing::new(result[0..self.cipher_key_size()].to_vec())
    }

    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
        check_key_length(key, 16)?;
        check_block_multiple(data, 8)?;
        let decryptor = cbc::Decryptor::<TdesEde2>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::IvLength { expected: 8, obtained: iv.len() })?;
        let data_len = data.len();
        decryptor.decrypt_padded_mut::<NoPadding>(data)
            .map_err(|_| CryptoError::DataLength { block_size: 8, obtained: data_len })?;
        Ok(())
    }

    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
        check_key_length(key, 16)?;
        check_block_multiple(data, 8)?;
        let encryptor = cbc::Encryptor::<TdesEde2>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::IvLength { expected: 8, obtained: iv.len() })?;
        let data_len = data.len();
        encryptor.encrypt_padded_mut::<NoPadding>(data, data_len)
            .map_err(|_| CryptoError::DataLength { block_size: 8, obtained: data_len })?;
        Ok(())
    }

    fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        check_key_length(key, 16)?;
        check_block_multiple(data, 8)?;
        let key_one = <Des as KeyInit>::new_from_slice(&key[0..8])
            .map_err(|_| CryptoError::KeyLength { expected: 16, obtained: key.len() })?;
        let key_two = <Des as KeyInit>::new_from_slice(&key[8..16])
            .map_err(|_| CryptoError::KeyLength { expected: 16, obtained: key.len() })?;

        // single-DES CBC over everything, then a final decrypt/encrypt round
        let mut state = Zeroizing::new([0u8; 8]);
        for chunk in data.chunks(8) {
            for (state_byte, data_byte) in state.iter_mut().zip(chunk) {
                *state_byte ^= *data_byte;
            }
            key_one.encrypt_block(GenericArray::from_mut_slice(&mut state[..]));
        }
        key_two.decrypt_block(GenericArray::from_mut_slice(&mut state[..]));
        key_one.encrypt_block(GenericArray::from_mut_slice(&mut state[..]));
        Ok(Zeroizing::new(state.to_vec()))
    }

    fn sequence_counter_iv(&self, key: &[u8], _send_sequence_counter: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key_length(key, 16)?;
        Ok(vec![0u8; 8])
    }
}


macro_rules! aes_cipher_and_mac {
    ($(#[$meta:meta])* $name:ident, $aes:ty, $key_size:expr, $hash:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name;
        impl CipherAndMac for $name {
            fn cipher_key_size(&self) -> usize { $key_size }
            fn cipher_block_size(&self) -> usize { 16 }
            fn mac_block_size(&self) -> usize { 1 }

            fn derive_key(&self, key_seed: &[u8], counter: u32) -> Zeroizing<Vec<u8>> {
                let mut hasher = <$hash>::new();
                Digest::update(&mut hasher, key_seed);
                Digest::update(&mut hasher, counter.to_be_bytes());
                let result = hasher.finalize();
                Zeroizing::new(result[0..self.cipher_key_size()].to_vec())
            }

            fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
                check_key_length(key, $key_size)?;
                check_block_multiple(data, 16)?;
                let decryptor = cbc::Decryptor::<$aes>::new_from_slices(key, iv)
                    .map_err(|_| CryptoError::IvLength { expected: 16, obtained: iv.len() })?;
                let data_len = data.len();
                decryptor.decrypt_padded_mut::<NoPadding>(data)
                    .map_err(|_| CryptoError::DataLength { block_size: 16, obtained: data_len })?;
                Ok(())
            }

            fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
                check_key_length(key, $key_size)?;
                check_block_multiple(data, 16)?;
                let encryptor = cbc::Encryptor::<$aes>::new_from_slices(key, iv)
                    .map_err(|_| CryptoError::IvLength { expected: 16, obtained: iv.len() })?;
                let data_len = data.len();
                encryptor.encrypt_padded_mut::<NoPadding>(data, data_len)
                    .map_err(|_| CryptoError::DataLength { block_size: 16, obtained: data_len })?;
                Ok(())
            }

            fn mac_padded_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
                check_key_length(key, $key_size)?;
                let mut mac = <Cmac<$aes> as Mac>::new_from_slice(key)
                    .map_err(|_| CryptoError::KeyLength { expected: $key_size, obtained: key.len() })?;
                Mac::update(&mut mac, data);
                let full_mac = Zeroizing::new(Mac::finalize(mac).into_bytes().to_vec());
                Ok(Zeroizing::new(full_mac[0..MAC_LENGTH].to_vec()))
            }

            fn sequence_counter_iv(&self, key: &[u8], send_sequence_counter: &[u8]) -> Result<Vec<u8>, CryptoError> {
                check_key_length(key, $key_size)?;
                if send_sequence_counter.len() != 16 {
                    return Err(CryptoError::IvLength { expected: 16, obtained: send_sequence_counter.len() });
                }
                let cipher = <$aes as KeyInit>::new_from_slice(key)
                    .map_err(|_| CryptoError::KeyLength { expected: $key_size, obtained: key.len() })?;
                let mut iv = send_sequence_counter.to_vec();
                cipher.encrypt_block(GenericArray::from_mut_slice(&mut iv));
                Ok(iv)
            }
        }
    };
}

aes_cipher_and_mac!(
    /// AES-128-based cipher and MAC.
    ///
    /// The block mode of operation is CBC; the Secure Messaging IV is the send sequence counter
    /// encrypted with the session encryption key. The KDF is `sha1(key || counter)[0..16]` and the
    /// MAC is AES-128 CMAC truncated to 8 bytes.
    CamAes128, Aes128, 16, Sha1
);
aes_cipher_and_mac!(
    /// AES-192-based cipher and MAC.
    ///
    /// Like [`CamAes128`], except that the KDF is `sha256(key || counter)[0..24]`.
    CamAes192, Aes192, 24, Sha256
);
aes_cipher_and_mac!(
    /// AES-256-based cipher and MAC.
    ///
    /// Like [`CamAes128`], except that the KDF is `sha256(key || counter)`.
    CamAes256, Aes256, 32, Sha256
);
