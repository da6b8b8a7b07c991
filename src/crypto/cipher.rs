use std::fmt::{Debug, Formatter};
use std::str::FromStr;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use data_encoding::BASE64;
use rand::{rngs::OsRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use super::{CryptoError, SessionKey};

/// Length of the AES-GCM nonce prefix in bytes (96 bits).
pub const NONCE_LENGTH: usize = 12;

/// Length of the AES-GCM authentication tag suffix in bytes (128 bits).
pub const TAG_LENGTH: usize = 16;

/// A sealed template: `nonce || ciphertext || tag`.
///
/// Any value of this type is at least `NONCE_LENGTH + TAG_LENGTH` bytes long;
/// shorter input is rejected as malformed before decryption is attempted.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    /// Wrap raw blob bytes, checking the minimum length.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LENGTH {
            return Err(CryptoError::MalformedInput(format!(
                "blob of {} bytes is shorter than the {NONCE_LENGTH}-byte nonce",
                bytes.len()
            )));
        }
        if bytes.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CryptoError::MalformedInput(format!(
                "blob of {} bytes cannot hold a nonce and a {TAG_LENGTH}-byte tag",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Decode the base64 wire format.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(BASE64.decode(encoded.trim().as_bytes())?)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The nonce this blob was sealed with.
    pub fn nonce(&self) -> &[u8] {
        &self.0[..NONCE_LENGTH]
    }

    /// Everything after the nonce: the encrypted body followed by the tag.
    fn sealed(&self) -> &[u8] {
        &self.0[NONCE_LENGTH..]
    }
}

impl FromStr for Ciphertext {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl Debug for Ciphertext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ciphertext({} bytes)", self.0.len())
    }
}

impl Serialize for Ciphertext {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Ciphertext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(D::Error::custom)
    }
}

fn cipher_for(key: &SessionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Seal `plaintext` under `key` with a fresh random nonce.
///
/// A new nonce is drawn from the OS entropy source on every call; nonces are
/// never derived from state, so two calls can only collide by chance.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> Result<Ciphertext, CryptoError> {
    let mut nonce = [0; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher_for(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(sealing_failed)?;

    let mut blob = Vec::with_capacity(NONCE_LENGTH + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend(sealed);
    Ok(Ciphertext(blob))
}

fn sealing_failed(_: aes_gcm::Error) -> CryptoError {
    CryptoError::EncryptionFailure
}

/// Open a sealed blob. Fails with [`CryptoError::AuthenticationFailure`] if
/// the key is wrong or any byte was altered; no plaintext is released then.
pub fn decrypt(blob: &Ciphertext, key: &SessionKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    cipher_for(key)
        .decrypt(Nonce::from_slice(blob.nonce()), blob.sealed())
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

/// Decode and open a blob in its base64 wire format.
pub fn decrypt_base64(encoded: &str, key: &SessionKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    decrypt(&Ciphertext::from_base64(encoded)?, key)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn round_trip() {
        let key = SessionKey::random();
        for len in [0, 1, 15, 16, 17, 255, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
            let blob = encrypt(&plaintext, &key).unwrap();
            assert_eq!(blob.as_bytes().len(), NONCE_LENGTH + len + TAG_LENGTH);
            assert_eq!(*decrypt(&blob, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn wire_format_round_trip() {
        let key = SessionKey::random();
        let blob = encrypt(b"palm template", &key).unwrap();
        let wire = blob.to_base64();
        assert_eq!(*decrypt_base64(&wire, &key).unwrap(), b"palm template");
        assert_eq!(wire.parse::<Ciphertext>().unwrap(), blob);
    }

    #[test]
    fn every_bit_flip_is_detected() {
        let key = SessionKey::random();
        let blob = encrypt(&[10, 20, 30, 40, 50], &key).unwrap();
        for byte in 0..blob.as_bytes().len() {
            for bit in 0..8 {
                let mut tampered = blob.as_bytes().to_vec();
                tampered[byte] ^= 1 << bit;
                let tampered = Ciphertext::from_bytes(tampered).unwrap();
                assert_eq!(
                    decrypt(&tampered, &key).unwrap_err(),
                    CryptoError::AuthenticationFailure,
                    "flip of bit {bit} in byte {byte} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn wrong_key_is_authentication_failure() {
        let blob = encrypt(b"secret", &SessionKey::random()).unwrap();
        assert_eq!(
            decrypt(&blob, &SessionKey::random()).unwrap_err(),
            CryptoError::AuthenticationFailure
        );
    }

    #[test]
    fn nonces_are_unique() {
        let key = SessionKey::random();
        let nonces: HashSet<Vec<u8>> = (0..10_000)
            .map(|_| encrypt(b"same", &key).unwrap().nonce().to_vec())
            .collect();
        assert_eq!(nonces.len(), 10_000);
    }

    #[test]
    fn sealing_failure_has_its_own_error() {
        let err = sealing_failed(aes_gcm::Error);
        assert_eq!(err, CryptoError::EncryptionFailure);
        assert!(!matches!(err, CryptoError::MalformedInput(_)));
        assert_eq!(err.to_string(), "Failed to seal plaintext");
    }

    #[test]
    fn short_blobs_are_malformed() {
        for len in [0, 5, NONCE_LENGTH - 1, NONCE_LENGTH, NONCE_LENGTH + TAG_LENGTH - 1] {
            assert!(matches!(
                Ciphertext::from_bytes(vec![0; len]),
                Err(CryptoError::MalformedInput(_))
            ));
        }
        let key = SessionKey::random();
        assert!(matches!(
            decrypt_base64(&BASE64.encode(&[1; 4]), &key),
            Err(CryptoError::MalformedInput(_))
        ));
        assert!(matches!(
            decrypt_base64("%%%", &key),
            Err(CryptoError::Encoding(_))
        ));
    }
}
