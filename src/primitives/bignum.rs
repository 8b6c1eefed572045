// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Arbitrary precision signed integers.
//!
//! Serialization is compatible with the OpenSSL `MPI` format: a 4 byte
//! big-endian length followed by the big-endian sign-magnitude of the value.
//! The top bit of the first magnitude byte is the sign, and a `0x00` byte is
//! prepended when the magnitude itself has that bit set. Zero is encoded with
//! an empty body and never carries a sign.

use crate::primitives::Hash256;
use ibig::modular::ModuloRing;
use ibig::ops::UnsignedAbs;
use ibig::{IBig, UBig};
use rand::Rng;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Shl, Shr, Sub, SubAssign};

/// Primes used for trial division before running Miller-Rabin.
const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BignumErr {
    /// Divisor is zero
    DivisionByZero,

    /// Modulus is zero
    InvalidModulus,

    /// Value has no inverse for the given modulus
    NotInvertible,

    /// Radix outside of `2..=16`
    InvalidRadix(u32),

    /// Random range is not strictly positive
    InvalidRange,

    /// Requested bit size cannot hold a prime of the requested kind
    InvalidBitSize,

    /// Malformed serialized value
    InvalidEncoding(&'static str),
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bignum(IBig);

impl Default for Bignum {
    fn default() -> Self {
        Self::zero()
    }
}

impl Bignum {
    #[must_use]
    pub fn zero() -> Self {
        Self(IBig::from(0u8))
    }

    #[must_use]
    pub fn one() -> Self {
        Self(IBig::from(1u8))
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == IBig::from(0u8)
    }

    #[must_use]
    pub fn is_one(&self) -> bool {
        self.0 == IBig::from(1u8)
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0 < IBig::from(0u8)
    }

    #[must_use]
    pub fn magnitude(&self) -> UBig {
        (&self.0).unsigned_abs()
    }

    fn from_parts(negative: bool, magnitude: UBig) -> Self {
        let value = IBig::from(magnitude);

        if negative {
            Self(-value)
        } else {
            Self(value)
        }
    }

    /// Interprets `bytes` as a big-endian unsigned magnitude.
    #[must_use]
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        Self(IBig::from(UBig::from_be_bytes(bytes)))
    }

    /// Big-endian magnitude without leading zeros. Zero yields an empty vector.
    #[must_use]
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let bytes = self.magnitude().to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        bytes[start..].to_vec()
    }

    /// Reads a 256-bit hash as a little-endian unsigned value.
    #[must_use]
    pub fn from_hash256(hash: &Hash256) -> Self {
        Self(IBig::from(UBig::from_le_bytes(&hash.0)))
    }

    /// Low 256 bits of the magnitude, little-endian.
    #[must_use]
    pub fn to_hash256(&self) -> Hash256 {
        let bytes = self.magnitude().to_le_bytes();
        let mut out = Hash256::zero();
        let len = bytes.len().min(32);
        out.0[..len].copy_from_slice(&bytes[..len]);
        out
    }

    fn mpi_body(&self) -> Vec<u8> {
        let mut body = self.to_be_bytes();

        if body.first().map_or(false, |b| b & 0x80 != 0) {
            body.insert(0, 0);
        }

        if self.is_negative() {
            body[0] |= 0x80;
        }

        body
    }

    fn from_mpi_body(body: &[u8]) -> Self {
        if body.is_empty() {
            return Self::zero();
        }

        let negative = body[0] & 0x80 != 0;
        let mut magnitude = body.to_vec();
        magnitude[0] &= 0x7f;
        Self::from_parts(negative, UBig::from_be_bytes(&magnitude))
    }

    #[must_use]
    pub fn to_mpi(&self) -> Vec<u8> {
        let body = self.mpi_body();
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn from_mpi(bytes: &[u8]) -> Result<Self, BignumErr> {
        if bytes.len() < 4 {
            return Err(BignumErr::InvalidEncoding("mpi length prefix is missing"));
        }

        let mut len = [0; 4];
        len.copy_from_slice(&bytes[..4]);
        let len = u32::from_be_bytes(len) as usize;

        if bytes.len() - 4 != len {
            return Err(BignumErr::InvalidEncoding("mpi length prefix mismatch"));
        }

        Ok(Self::from_mpi_body(&bytes[4..]))
    }

    /// Little-endian `MPI` body without the length prefix, as used by script numerics.
    #[must_use]
    pub fn to_vch(&self) -> Vec<u8> {
        let mut body = self.mpi_body();
        body.reverse();
        body
    }

    #[must_use]
    pub fn from_vch(vch: &[u8]) -> Self {
        let mut body = vch.to_vec();
        body.reverse();
        Self::from_mpi_body(&body)
    }

    /// Encodes the value in the 4 byte `nBits` format: one byte holding the
    /// size of the `MPI` body followed by its first three bytes.
    #[must_use]
    pub fn get_compact(&self) -> u32 {
        let body = self.mpi_body();
        let size = body.len() as u32;
        let mut compact = size << 24;

        for (i, byte) in body.iter().take(3).enumerate() {
            compact |= u32::from(*byte) << (16 - 8 * i);
        }

        compact
    }

    pub fn set_compact(&mut self, compact: u32) {
        let size = (compact >> 24) as usize;
        let mut body = vec![0; size];

        for (i, byte) in body.iter_mut().take(3).enumerate() {
            *byte = ((compact >> (16 - 8 * i)) & 0xff) as u8;
        }

        *self = Self::from_mpi_body(&body);
    }

    #[must_use]
    pub fn from_compact(compact: u32) -> Self {
        let mut out = Self::zero();
        out.set_compact(compact);
        out
    }

    /// Parses a hex string, accepting leading whitespace, an optional `-` sign and
    /// an optional `0x` prefix. The digit run ends at whitespace or at the end
    /// of the string. Characters in the run that are not hex digits count as `0`.
    pub fn set_hex(&mut self, hexstr: &str) {
        let s = hexstr.trim_start();
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s)
            .trim_start();

        let mut magnitude = UBig::from(0u8);

        for c in s.chars().take_while(|c| !c.is_whitespace()) {
            magnitude <<= 4;
            magnitude += UBig::from(c.to_digit(16).unwrap_or(0));
        }

        *self = Self::from_parts(negative, magnitude);
    }

    #[must_use]
    pub fn from_hex(hexstr: &str) -> Self {
        let mut out = Self::zero();
        out.set_hex(hexstr);
        out
    }

    #[must_use]
    pub fn get_hex(&self) -> String {
        format!("{}", self.0.in_radix(16))
    }

    pub fn to_string_radix(&self, radix: u32) -> Result<String, BignumErr> {
        if !(2..=16).contains(&radix) {
            return Err(BignumErr::InvalidRadix(radix));
        }

        Ok(format!("{}", self.0.in_radix(radix)))
    }

    /// Saturates at the bounds of `u64`.
    #[must_use]
    pub fn get_u64(&self) -> u64 {
        u64::try_from(self.magnitude()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn get_u32(&self) -> u32 {
        u32::try_from(self.get_u64()).unwrap_or(u32::MAX)
    }

    /// Saturates at the bounds of `i32`.
    #[must_use]
    pub fn get_int(&self) -> i32 {
        let n = self.get_u64();
        let max = i32::MAX as u64;

        if !self.is_negative() {
            n.min(max) as i32
        } else if n > max {
            i32::MIN
        } else {
            -(n as i32)
        }
    }

    #[must_use]
    pub fn bit_size(&self) -> u32 {
        self.magnitude().bit_len() as u32
    }

    pub fn inc(&mut self) {
        self.0 += IBig::from(1u8);
    }

    pub fn dec(&mut self) {
        self.0 -= IBig::from(1u8);
    }

    /// Truncating division.
    pub fn checked_div(&self, rhs: &Self) -> Result<Self, BignumErr> {
        if rhs.is_zero() {
            return Err(BignumErr::DivisionByZero);
        }

        Ok(Self(&self.0 / &rhs.0))
    }

    /// Non-negative remainder, always in `[0, |rhs|)` regardless of the sign of `self`.
    pub fn checked_rem(&self, rhs: &Self) -> Result<Self, BignumErr> {
        if rhs.is_zero() {
            return Err(BignumErr::DivisionByZero);
        }

        let modulus = IBig::from(rhs.magnitude());
        let mut rem = &self.0 % &modulus;

        if rem < IBig::from(0u8) {
            rem += &modulus;
        }

        Ok(Self(rem))
    }

    #[must_use]
    pub fn pow(&self, exp: u32) -> Self {
        Self(self.0.pow(exp as usize))
    }

    fn ring(modulus: &Self) -> Result<Option<ModuloRing>, BignumErr> {
        if modulus.is_zero() {
            return Err(BignumErr::InvalidModulus);
        }

        // Every value is congruent to zero modulo one
        if modulus.magnitude() == UBig::from(1u8) {
            return Ok(None);
        }

        Ok(Some(ModuloRing::new(&modulus.magnitude())))
    }

    /// `self^exp mod modulus`. A negative exponent raises the inverse of `self`.
    pub fn pow_mod(&self, exp: &Self, modulus: &Self) -> Result<Self, BignumErr> {
        if exp.is_negative() {
            let inverse = self.inverse(modulus)?;
            return inverse.pow_mod(&-exp.clone(), modulus);
        }

        let Some(ring) = Self::ring(modulus)? else {
            return Ok(Self::zero());
        };

        let result = ring.from(self.0.clone()).pow(&exp.magnitude());
        Ok(Self(IBig::from(result.residue())))
    }

    pub fn mul_mod(&self, other: &Self, modulus: &Self) -> Result<Self, BignumErr> {
        let Some(ring) = Self::ring(modulus)? else {
            return Ok(Self::zero());
        };

        let result = ring.from(self.0.clone()) * ring.from(other.0.clone());
        Ok(Self(IBig::from(result.residue())))
    }

    /// Modular inverse via the extended Euclidean algorithm.
    pub fn inverse(&self, modulus: &Self) -> Result<Self, BignumErr> {
        let Some(ring) = Self::ring(modulus)? else {
            return Ok(Self::zero());
        };

        ring.from(self.0.clone())
            .inverse()
            .map(|inv| Self(IBig::from(inv.residue())))
            .ok_or(BignumErr::NotInvertible)
    }

    #[must_use]
    pub fn gcd(&self, other: &Self) -> Self {
        let (a, b) = (self.magnitude(), other.magnitude());

        if a == UBig::from(0u8) {
            return Self(IBig::from(b));
        }

        if b == UBig::from(0u8) {
            return Self(IBig::from(a));
        }

        Self(IBig::from(a.gcd(&b)))
    }

    /// Miller-Rabin primality test. With `checks == 0` the number of rounds is
    /// picked by bit size so that the false positive rate is at most `2^-80`.
    #[must_use]
    pub fn is_prime(&self, checks: u32) -> bool {
        if self.0 <= IBig::from(1u8) {
            return false;
        }

        let n = self.magnitude();
        let zero = UBig::from(0u8);
        let one = UBig::from(1u8);

        for p in SMALL_PRIMES {
            let p = UBig::from(p);

            if n == p {
                return true;
            }

            if &n % &p == zero {
                return false;
            }
        }

        let rounds = if checks == 0 {
            prime_checks_for_size(self.bit_size())
        } else {
            checks
        };

        let n_minus_one = &n - &one;
        let s = n_minus_one.trailing_zeros().unwrap_or(0);
        let d = &n_minus_one >> s;
        let ring = ModuloRing::new(&n);
        let witness_bound = &n - UBig::from(3u8);

        'witness: for _ in 0..rounds {
            // a in [2, n - 2]
            let a = random_below(&witness_bound) + UBig::from(2u8);
            let mut x = ring.from(a).pow(&d);
            let residue = x.residue();

            if residue == one || residue == n_minus_one {
                continue;
            }

            for _ in 1..s {
                x = &x * &x;

                if x.residue() == n_minus_one {
                    continue 'witness;
                }
            }

            return false;
        }

        true
    }

    /// Generates a random prime of exactly `bits` bits. A safe prime `p` also
    /// has `(p - 1) / 2` prime.
    pub fn generate_prime(bits: u32, safe: bool) -> Result<Self, BignumErr> {
        let min_bits = if safe { 3 } else { 2 };

        if bits < min_bits {
            return Err(BignumErr::InvalidBitSize);
        }

        let top = UBig::from(1u8) << (bits as usize - 1);

        loop {
            let candidate = random_bits(bits as usize) | &top | UBig::from(1u8);
            let candidate = Self(IBig::from(candidate));

            if !candidate.is_prime(0) {
                continue;
            }

            if safe {
                let half = Self(IBig::from(candidate.magnitude() >> 1));

                if !half.is_prime(0) {
                    continue;
                }
            }

            return Ok(candidate);
        }
    }

    /// Uniform random value in `[0, range)`.
    pub fn rand_range(range: &Self) -> Result<Self, BignumErr> {
        if range.is_negative() || range.is_zero() {
            return Err(BignumErr::InvalidRange);
        }

        Ok(Self(IBig::from(random_below(&range.magnitude()))))
    }

    /// Random value of at most `k` bits.
    #[must_use]
    pub fn rand_bits(k: u32) -> Self {
        Self(IBig::from(random_bits(k as usize)))
    }
}

/// Number of Miller-Rabin rounds for an error rate of at most `2^-80`.
fn prime_checks_for_size(bits: u32) -> u32 {
    match bits {
        3747.. => 3,
        1345.. => 4,
        476.. => 5,
        400.. => 6,
        347.. => 7,
        308.. => 8,
        55.. => 27,
        _ => 34,
    }
}

fn random_bits(bits: usize) -> UBig {
    if bits == 0 {
        return UBig::from(0u8);
    }

    let len = (bits + 7) / 8;
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill(&mut buf[..]);
    buf[0] &= 0xff >> (len * 8 - bits);
    UBig::from_be_bytes(&buf)
}

/// `bound` must be non-zero.
fn random_below(bound: &UBig) -> UBig {
    let bits = bound.bit_len();

    loop {
        let candidate = random_bits(bits);

        if &candidate < bound {
            return candidate;
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Bignum {
                fn from(v: $t) -> Self {
                    Self(IBig::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

macro_rules! impl_bin_op {
    ($op:ident, $method:ident, $assign_op:ident, $assign_method:ident) => {
        impl $op for Bignum {
            type Output = Bignum;

            fn $method(self, rhs: Bignum) -> Bignum {
                Bignum($op::$method(self.0, rhs.0))
            }
        }

        impl<'a, 'b> $op<&'b Bignum> for &'a Bignum {
            type Output = Bignum;

            fn $method(self, rhs: &'b Bignum) -> Bignum {
                Bignum($op::$method(&self.0, &rhs.0))
            }
        }

        impl $assign_op for Bignum {
            fn $assign_method(&mut self, rhs: Bignum) {
                $assign_op::$assign_method(&mut self.0, rhs.0);
            }
        }
    };
}

impl_bin_op!(Add, add, AddAssign, add_assign);
impl_bin_op!(Sub, sub, SubAssign, sub_assign);
impl_bin_op!(Mul, mul, MulAssign, mul_assign);

impl Neg for Bignum {
    type Output = Bignum;

    fn neg(self) -> Bignum {
        Bignum(-self.0)
    }
}

impl Shl<u32> for &Bignum {
    type Output = Bignum;

    fn shl(self, shift: u32) -> Bignum {
        Bignum(&self.0 << shift as usize)
    }
}

impl Shr<u32> for &Bignum {
    type Output = Bignum;

    /// Values smaller than `2^shift`, which includes every negative value, shift to zero.
    fn shr(self, shift: u32) -> Bignum {
        let bound = IBig::from(1u8) << shift as usize;

        if bound > self.0 {
            return Bignum::zero();
        }

        Bignum(&self.0 >> shift as usize)
    }
}

impl fmt::Display for Bignum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Bignum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bignum").field(&self.get_hex()).finish()
    }
}
