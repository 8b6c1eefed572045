// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::hash::{hash160, sha256d};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::convert::From;
use std::fmt;
use std::hash::Hash as HashTrait;
use std::str;
use zeroize::Zeroize;

/// Decodes a hex string into a fixed size byte array at compile time.
///
/// Panics (at compile time when used in a `const` context) if the string
/// is not exactly `2 * N` hex characters.
#[must_use]
pub const fn decode_hex_array<const N: usize>(hexstr: &str) -> [u8; N] {
    let bytes = hexstr.as_bytes();
    assert!(bytes.len() == N * 2, "invalid hex length");
    let mut out = [0; N];
    let mut i = 0;

    while i < N {
        out[i] = (hex_nibble(bytes[i * 2]) << 4) | hex_nibble(bytes[i * 2 + 1]);
        i += 1;
    }

    out
}

const fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex character"),
    }
}

#[derive(PartialEq, Eq, Encode, Decode, Clone, Copy, HashTrait, Zeroize, Serialize, Deserialize)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 20])
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `RIPEMD160(SHA256(slice))`
    #[inline]
    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T) -> Self {
        Self(hash160(slice.as_ref()))
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash160").field(&self.to_hex()).finish()
    }
}

#[derive(
    PartialEq,
    Eq,
    Encode,
    Decode,
    Clone,
    HashTrait,
    Zeroize,
    PartialOrd,
    Ord,
    Default,
    Copy,
    Serialize,
    Deserialize,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self([0; 32])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;

        if bytes.len() != 32 {
            return Err("invalid hash length! expected 32 bytes");
        }

        let mut out = Self::zero();
        out.0.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Hardcoded hashes are decoded at compile time.
    #[must_use]
    pub const fn from_hex_const(hexstr: &str) -> Self {
        Self(decode_hex_array::<32>(hexstr))
    }

    /// Double SHA256 of the given slice.
    #[inline]
    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T) -> Self {
        Self(sha256d(slice.as_ref()))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(v: [u8; 32]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash256").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
