use std::fmt::{Debug, Formatter};
use std::str::FromStr;

use data_encoding::BASE64;
use rand::{rngs::OsRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;

/// Length of a session key in bytes.
pub const KEY_LENGTH: usize = 32;

/// A symmetric session key, wiped from memory when dropped.
///
/// On the wire and at rest this is a base64 string of the raw 32 bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LENGTH]);

impl SessionKey {
    /// Issue a fresh key from the OS entropy source.
    ///
    /// Nothing is cached: every call returns an independent key. Panics if
    /// the entropy source is unavailable, since nothing can proceed without it.
    pub fn random() -> Self {
        let mut key = Self([0; KEY_LENGTH]);
        OsRng.fill_bytes(&mut key.0);
        key
    }

    /// Wrap raw key bytes, which must be exactly [`KEY_LENGTH`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Decode a base64 key as exchanged across the service boundary.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = BASE64.decode(encoded.trim().as_bytes())?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl FromStr for SessionKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

// Never print key material, even in debug output.
impl Debug for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl Serialize for SessionKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(D::Error::custom)
    }
}
