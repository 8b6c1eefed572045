// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! secp256k1 keys, DER and compact ECDSA signatures and BIP32 derivation.

use crate::primitives::bignum::Bignum;
use crate::primitives::hash::hmac_sha512;
use crate::primitives::secure::SecureBytes;
use crate::primitives::{Hash160, Hash256};
use lazy_static::lazy_static;
use rand::RngCore;
use secp256k1::constants::CURVE_ORDER;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{All, Message, PublicKey, Scalar, Secp256k1, SecretKey};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use zeroize::Zeroize;

lazy_static! {
    static ref SECP256K1: Secp256k1<All> = Secp256k1::new();
    static ref ORDER: Bignum = Bignum::from_be_bytes(&CURVE_ORDER);
    static ref MAX_MOD_ORDER: Bignum = &*ORDER - &Bignum::one();
    static ref MAX_MOD_HALF_ORDER: Bignum = &*ORDER >> 1;
}

/// Child indexes at or above this value use hardened derivation.
pub const BIP32_HARDENED: u32 = 0x8000_0000;

/// Serialized size of an extended key.
pub const BIP32_EXTKEY_SIZE: usize = 74;

/// Header byte, `r` and `s`.
pub const COMPACT_SIGNATURE_SIZE: usize = 65;

const BIP32_SEED_KEY: &[u8] = b"Bitcoin seed";
const KEY_VERIFICATION_PREFIX: &[u8] = b"Stakecoin key verification\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyErr {
    /// Secret is not in `(0, n)`
    InvalidSecret,

    /// Public key bytes are malformed or not on the curve
    InvalidPubKey,

    /// Operation requires a valid key
    InvalidKey,

    /// No recovery id reproduces the signing key
    RecoveryFailed,

    /// Malformed serialized key
    InvalidEncoding(&'static str),
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Zeroize)]
pub struct ChainCode(pub [u8; 32]);

impl fmt::Debug for ChainCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChainCode")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// Checks that a big-endian signature component is in `(0, n - 1]`, or in
/// `(0, (n - 1) / 2]` when `half` is set.
#[must_use]
pub fn check_signature_element(bytes: &[u8], half: bool) -> bool {
    let value = Bignum::from_be_bytes(bytes);
    let max = if half {
        &*MAX_MOD_HALF_ORDER
    } else {
        &*MAX_MOD_ORDER
    };

    !value.is_zero() && &value <= max
}

/// Writes `(secret + tweak) mod n` into `out`. Fails when the tweak is not
/// below the curve order or the result is zero.
fn tweak_secret(out: &mut [u8; 32], secret: &[u8; 32], tweak: &[u8]) -> bool {
    let tweak = Bignum::from_be_bytes(tweak);

    if tweak >= *ORDER {
        return false;
    }

    let sum = Bignum::from_be_bytes(secret) + tweak;
    let Ok(sum) = sum.checked_rem(&ORDER) else {
        return false;
    };

    if sum.is_zero() {
        return false;
    }

    let bytes = sum.to_be_bytes();
    out.fill(0);
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    true
}

fn bip32_hash(chain_code: &ChainCode, child: u32, header: u8, data: &[u8]) -> SecureBytes<64> {
    let mut raw = hmac_sha512(&chain_code.0, &[&[header], data, &child.to_be_bytes()]);
    let out = SecureBytes::from_array(&raw);
    raw.zeroize();
    out
}

fn split_chain_code(out: &SecureBytes<64>) -> ChainCode {
    let mut chain_code = ChainCode::default();
    chain_code.0.copy_from_slice(&out.as_bytes()[32..]);
    chain_code
}

/// A secp256k1 secret scalar kept in locked memory.
///
/// Keys start out invalid and only become valid through generation, import or
/// derivation. A failed import leaves the key invalid.
#[derive(Clone)]
pub struct PrivKey {
    secret: SecureBytes<32>,
    valid: bool,
    compressed: bool,
}

impl Default for PrivKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivKey {
    #[must_use]
    pub fn new() -> Self {
        Self {
            secret: SecureBytes::new(),
            valid: false,
            compressed: false,
        }
    }

    fn check(bytes: &[u8]) -> bool {
        let k = Bignum::from_be_bytes(bytes);
        !k.is_zero() && k < *ORDER
    }

    /// Draws random secrets until one lies in `(0, n)`.
    #[must_use]
    pub fn make_new_key(compressed: bool) -> Self {
        let mut key = Self::new();
        let mut rng = rand::thread_rng();

        loop {
            rng.fill_bytes(key.secret.as_mut_bytes());

            if Self::check(key.secret.as_bytes()) {
                break;
            }
        }

        key.valid = true;
        key.compressed = compressed;
        key
    }

    /// Imports a raw 32 byte secret. On failure the key is wiped and left invalid.
    pub fn set(&mut self, bytes: &[u8], compressed: bool) -> bool {
        if bytes.len() != 32 || !Self::check(bytes) {
            self.secret.zeroize();
            self.valid = false;
            return false;
        }

        self.secret.as_mut_bytes().copy_from_slice(bytes);
        self.valid = true;
        self.compressed = compressed;
        true
    }

    pub fn from_slice(bytes: &[u8], compressed: bool) -> Result<Self, KeyErr> {
        let mut key = Self::new();

        if !key.set(bytes, compressed) {
            return Err(KeyErr::InvalidSecret);
        }

        Ok(key)
    }

    pub fn from_hex(hexstr: &str, compressed: bool) -> Result<Self, KeyErr> {
        let mut bytes =
            hex::decode(hexstr.trim()).map_err(|_| KeyErr::InvalidEncoding("invalid hexstr"))?;
        let key = Self::from_slice(&bytes, compressed);
        bytes.zeroize();
        key
    }

    /// Imports a secret together with its public key. Unless `skip_check` is
    /// set, the pair is tested by signing and verifying a random hash.
    pub fn load(secret: &[u8], pubkey: &PubKey, skip_check: bool) -> Result<Self, KeyErr> {
        let key = Self::from_slice(secret, pubkey.is_compressed())?;

        if skip_check || key.verify_pub_key(pubkey) {
            Ok(key)
        } else {
            Err(KeyErr::InvalidKey)
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    #[must_use]
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.secret.as_bytes()
    }

    fn secret_key(&self) -> Result<SecretKey, KeyErr> {
        if !self.valid {
            return Err(KeyErr::InvalidKey);
        }

        SecretKey::from_slice(self.secret.as_bytes()).map_err(|_| KeyErr::InvalidSecret)
    }

    pub fn pub_key(&self) -> Result<PubKey, KeyErr> {
        let secret_key = self.secret_key()?;
        let point = PublicKey::from_secret_key(&SECP256K1, &secret_key);
        Ok(PubKey::from_point(&point, self.compressed))
    }

    /// DER encoded signature with `s` in the lower half of the curve order.
    pub fn sign(&self, hash: &Hash256) -> Result<Vec<u8>, KeyErr> {
        let secret_key = self.secret_key()?;
        let msg = Message::from_digest(hash.0);
        let mut sig = SECP256K1.sign_ecdsa(&msg, &secret_key);
        sig.normalize_s();
        Ok(sig.serialize_der().to_vec())
    }

    /// 65 byte signature from which the public key can be recovered. The
    /// header byte is `27 + recovery id + 4 * compressed`.
    pub fn sign_compact(&self, hash: &Hash256) -> Result<[u8; COMPACT_SIGNATURE_SIZE], KeyErr> {
        let secret_key = self.secret_key()?;
        let own = self.pub_key()?;
        let msg = Message::from_digest(hash.0);
        let mut sig = SECP256K1.sign_ecdsa(&msg, &secret_key);
        sig.normalize_s();
        let compact = sig.serialize_compact();
        let mut rec = None;

        for i in 0..4 {
            let Ok(id) = RecoveryId::from_i32(i) else {
                continue;
            };
            let Ok(candidate) = RecoverableSignature::from_compact(&compact, id) else {
                continue;
            };

            if let Ok(point) = SECP256K1.recover_ecdsa(&msg, &candidate) {
                if PubKey::from_point(&point, self.compressed) == own {
                    rec = Some(i as u8);
                    break;
                }
            }
        }

        debug_assert!(rec.is_some(), "own signature must be recoverable");
        let rec = rec.ok_or(KeyErr::RecoveryFailed)?;
        let mut out = [0; COMPACT_SIGNATURE_SIZE];
        out[0] = 27 + rec + if self.compressed { 4 } else { 0 };
        out[1..].copy_from_slice(&compact);
        Ok(out)
    }

    /// Checks that `pubkey` belongs to this key by signing a random hash.
    #[must_use]
    pub fn verify_pub_key(&self, pubkey: &PubKey) -> bool {
        if pubkey.is_compressed() != self.compressed {
            return false;
        }

        let mut rnd = [0; 8];
        rand::thread_rng().fill_bytes(&mut rnd);
        let hash = Hash256::hash_from_slice([KEY_VERIFICATION_PREFIX, &rnd[..]].concat());

        match self.sign(&hash) {
            Ok(sig) => pubkey.verify(&hash, &sig),
            Err(_) => false,
        }
    }

    /// BIP32 child key derivation. Hardened children hash the secret, normal
    /// children hash the compressed public key. Returns `None` in the
    /// negligible case where the tweak is out of range or the child is zero.
    #[must_use]
    pub fn derive(&self, child: u32, chain_code: &ChainCode) -> Option<(PrivKey, ChainCode)> {
        if !self.valid {
            return None;
        }

        let out = if child < BIP32_HARDENED {
            let secret_key = self.secret_key().ok()?;
            let pubkey = PublicKey::from_secret_key(&SECP256K1, &secret_key).serialize();
            bip32_hash(chain_code, child, pubkey[0], &pubkey[1..])
        } else {
            bip32_hash(chain_code, child, 0, self.secret.as_bytes())
        };

        let mut child_key = PrivKey::new();

        if !tweak_secret(
            child_key.secret.as_mut_bytes(),
            self.secret.as_bytes(),
            &out.as_bytes()[..32],
        ) {
            return None;
        }

        child_key.valid = true;
        child_key.compressed = true;
        Some((child_key, split_chain_code(&out)))
    }
}

impl PartialEq for PrivKey {
    fn eq(&self, other: &Self) -> bool {
        self.valid == other.valid
            && self.compressed == other.compressed
            && self.secret.as_bytes() == other.secret.as_bytes()
    }
}

impl Eq for PrivKey {}

impl fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivKey")
            .field("valid", &self.valid)
            .field("compressed", &self.compressed)
            .finish_non_exhaustive()
    }
}

/// Serialized secp256k1 point, 33 bytes compressed or 65 bytes uncompressed.
#[derive(Clone, Copy)]
pub struct PubKey {
    data: [u8; 65],
}

impl PubKey {
    fn len_from_header(header: u8) -> usize {
        match header {
            2 | 3 => 33,
            4 | 6 | 7 => 65,
            _ => 0,
        }
    }

    #[must_use]
    pub fn invalid() -> Self {
        let mut data = [0; 65];
        data[0] = 0xff;
        Self { data }
    }

    /// Format check only. A slice whose length disagrees with its header
    /// byte yields an invalid key.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let len = bytes.first().map_or(0, |h| Self::len_from_header(*h));

        if len == 0 || len != bytes.len() {
            return Self::invalid();
        }

        let mut data = [0; 65];
        data[..len].copy_from_slice(bytes);
        Self { data }
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, KeyErr> {
        let bytes = hex::decode(hexstr).map_err(|_| KeyErr::InvalidEncoding("invalid hexstr"))?;
        let key = Self::from_slice(&bytes);

        if !key.is_valid() {
            return Err(KeyErr::InvalidPubKey);
        }

        Ok(key)
    }

    fn from_point(point: &PublicKey, compressed: bool) -> Self {
        if compressed {
            Self::from_slice(&point.serialize())
        } else {
            Self::from_slice(&point.serialize_uncompressed())
        }
    }

    fn point(&self) -> Option<PublicKey> {
        if !self.is_valid() {
            return None;
        }

        PublicKey::from_slice(self.as_bytes()).ok()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        Self::len_from_header(self.data[0])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size()]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.size() > 0
    }

    /// Parses the point, which verifies that it lies on the curve.
    #[must_use]
    pub fn is_fully_valid(&self) -> bool {
        self.point().is_some()
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.size() == 33
    }

    #[must_use]
    pub fn id(&self) -> Hash160 {
        Hash160::hash_from_slice(self.as_bytes())
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::hash_from_slice(self.as_bytes())
    }

    /// Verifies a DER signature. The DER is parsed leniently and `s` is
    /// normalized so that both halves of the order are accepted.
    #[must_use]
    pub fn verify(&self, hash: &Hash256, sig: &[u8]) -> bool {
        let Some(point) = self.point() else {
            return false;
        };
        let Ok(mut sig) = Signature::from_der_lax(sig) else {
            return false;
        };

        sig.normalize_s();
        SECP256K1
            .verify_ecdsa(&Message::from_digest(hash.0), &sig, &point)
            .is_ok()
    }

    /// Reconstructs the signing key from a compact signature.
    #[must_use]
    pub fn recover_compact(hash: &Hash256, sig: &[u8]) -> Option<Self> {
        if sig.len() != COMPACT_SIGNATURE_SIZE || !(27..35).contains(&sig[0]) {
            return None;
        }

        let header = sig[0] - 27;
        let compressed = header & 4 != 0;
        let id = RecoveryId::from_i32(i32::from(header & 3)).ok()?;
        let sig = RecoverableSignature::from_compact(&sig[1..], id).ok()?;
        let point = SECP256K1
            .recover_ecdsa(&Message::from_digest(hash.0), &sig)
            .ok()?;

        Some(Self::from_point(&point, compressed))
    }

    #[must_use]
    pub fn verify_compact(&self, hash: &Hash256, sig: &[u8]) -> bool {
        Self::recover_compact(hash, sig).map_or(false, |recovered| &recovered == self)
    }

    #[must_use]
    pub fn decompress(&self) -> Option<Self> {
        self.point().map(|point| Self::from_point(&point, false))
    }

    #[must_use]
    pub fn compress(&self) -> Option<Self> {
        self.point().map(|point| Self::from_point(&point, true))
    }

    /// Non-hardened BIP32 derivation. Only compressed keys can be derived.
    #[must_use]
    pub fn derive(&self, child: u32, chain_code: &ChainCode) -> Option<(PubKey, ChainCode)> {
        if child >= BIP32_HARDENED || !self.is_compressed() {
            return None;
        }

        let out = bip32_hash(chain_code, child, self.data[0], &self.data[1..33]);
        let mut tweak = [0; 32];
        tweak.copy_from_slice(&out.as_bytes()[..32]);
        let tweak = Scalar::from_be_bytes(tweak).ok()?;
        let point = self.point()?.add_exp_tweak(&SECP256K1, &tweak).ok()?;
        Some((Self::from_point(&point, true), split_chain_code(&out)))
    }
}

impl PartialEq for PubKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for PubKey {}

impl PartialOrd for PubKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PubKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for PubKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PubKey").field(&self.to_hex()).finish()
    }
}

fn fingerprint_of(pubkey: &PubKey) -> [u8; 4] {
    let mut out = [0; 4];
    out.copy_from_slice(&pubkey.id().0[..4]);
    out
}

/// BIP32 extended private key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtKey {
    pub depth: u8,
    pub fingerprint: [u8; 4],
    pub child: u32,
    pub chain_code: ChainCode,
    pub key: PrivKey,
}

impl ExtKey {
    pub fn set_master(seed: &[u8]) -> Result<Self, KeyErr> {
        let mut raw = hmac_sha512(BIP32_SEED_KEY, &[seed]);
        let out = SecureBytes::from_array(&raw);
        raw.zeroize();
        let key = PrivKey::from_slice(&out.as_bytes()[..32], true)?;

        Ok(Self {
            depth: 0,
            fingerprint: [0; 4],
            child: 0,
            chain_code: split_chain_code(&out),
            key,
        })
    }

    #[must_use]
    pub fn derive(&self, child: u32) -> Option<Self> {
        let parent = self.key.pub_key().ok()?.compress()?;
        let (key, chain_code) = self.key.derive(child, &self.chain_code)?;

        Some(Self {
            depth: self.depth.checked_add(1)?,
            fingerprint: fingerprint_of(&parent),
            child,
            chain_code,
            key,
        })
    }

    pub fn neuter(&self) -> Result<ExtPubKey, KeyErr> {
        let pubkey = self.key.pub_key()?.compress().ok_or(KeyErr::InvalidPubKey)?;
        ExtPubKey::new(
            self.depth,
            self.fingerprint,
            self.child,
            self.chain_code,
            pubkey,
        )
    }

    #[must_use]
    pub fn encode(&self) -> [u8; BIP32_EXTKEY_SIZE] {
        let mut out = [0; BIP32_EXTKEY_SIZE];
        out[0] = self.depth;
        out[1..5].copy_from_slice(&self.fingerprint);
        out[5..9].copy_from_slice(&self.child.to_be_bytes());
        out[9..41].copy_from_slice(&self.chain_code.0);
        out[42..].copy_from_slice(self.key.secret_bytes());
        out
    }

    pub fn decode(bytes: &[u8; BIP32_EXTKEY_SIZE]) -> Result<Self, KeyErr> {
        if bytes[41] != 0 {
            return Err(KeyErr::InvalidEncoding("missing private key marker"));
        }

        let mut fingerprint = [0; 4];
        fingerprint.copy_from_slice(&bytes[1..5]);
        let mut child = [0; 4];
        child.copy_from_slice(&bytes[5..9]);
        let mut chain_code = ChainCode::default();
        chain_code.0.copy_from_slice(&bytes[9..41]);

        Ok(Self {
            depth: bytes[0],
            fingerprint,
            child: u32::from_be_bytes(child),
            chain_code,
            key: PrivKey::from_slice(&bytes[42..], true)?,
        })
    }
}

/// BIP32 extended public key. The key is always compressed so that it
/// serializes to exactly [`BIP32_EXTKEY_SIZE`] bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtPubKey {
    depth: u8,
    fingerprint: [u8; 4],
    child: u32,
    chain_code: ChainCode,
    pubkey: PubKey,
}

impl ExtPubKey {
    pub fn new(
        depth: u8,
        fingerprint: [u8; 4],
        child: u32,
        chain_code: ChainCode,
        pubkey: PubKey,
    ) -> Result<Self, KeyErr> {
        if !pubkey.is_compressed() {
            return Err(KeyErr::InvalidPubKey);
        }

        Ok(Self {
            depth,
            fingerprint,
            child,
            chain_code,
            pubkey,
        })
    }

    #[must_use]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    #[must_use]
    pub fn fingerprint(&self) -> [u8; 4] {
        self.fingerprint
    }

    #[must_use]
    pub fn child(&self) -> u32 {
        self.child
    }

    #[must_use]
    pub fn chain_code(&self) -> &ChainCode {
        &self.chain_code
    }

    #[must_use]
    pub fn pubkey(&self) -> &PubKey {
        &self.pubkey
    }

    #[must_use]
    pub fn derive(&self, child: u32) -> Option<Self> {
        let (pubkey, chain_code) = self.pubkey.derive(child, &self.chain_code)?;

        Some(Self {
            depth: self.depth.checked_add(1)?,
            fingerprint: fingerprint_of(&self.pubkey),
            child,
            chain_code,
            pubkey,
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; BIP32_EXTKEY_SIZE] {
        let mut out = [0; BIP32_EXTKEY_SIZE];
        out[0] = self.depth;
        out[1..5].copy_from_slice(&self.fingerprint);
        out[5..9].copy_from_slice(&self.child.to_be_bytes());
        out[9..41].copy_from_slice(&self.chain_code.0);
        out[41..].copy_from_slice(self.pubkey.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8; BIP32_EXTKEY_SIZE]) -> Result<Self, KeyErr> {
        let mut fingerprint = [0; 4];
        fingerprint.copy_from_slice(&bytes[1..5]);
        let mut child = [0; 4];
        child.copy_from_slice(&bytes[5..9]);
        let mut chain_code = ChainCode::default();
        chain_code.0.copy_from_slice(&bytes[9..41]);

        Self::new(
            bytes[0],
            fingerprint,
            u32::from_be_bytes(child),
            chain_code,
            PubKey::from_slice(&bytes[41..]),
        )
    }
}
