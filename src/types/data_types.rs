/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store numbers or bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
    time::{Duration, SystemTime},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::{CryptoHasher, Digest};

/// Number that uniquely identifies a blockchain.
///
/// Votes and proposals are signed over bytes that include the `ChainID`, so that a signature made for
/// one chain can never be replayed on another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sequence number of the block being agreed upon.
///
/// Heights are never negative in a running chain, but the inner value is signed so that structurally
/// invalid messages can be represented and rejected during validation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Height(i64);

impl Height {
    /// Create a new `Height` with an `int` inner value.
    pub const fn new(int: i64) -> Self {
        Self(int)
    }

    /// Get the inner `i64` value of this `Height`.
    pub const fn int(&self) -> i64 {
        self.0
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<i64> for Height {
    type Output = Height;
    fn add(self, rhs: i64) -> Self::Output {
        Height::new(self.0 + rhs)
    }
}

impl AddAssign<i64> for Height {
    fn add_assign(&mut self, rhs: i64) {
        self.0 += rhs
    }
}

impl Sub<i64> for Height {
    type Output = Height;
    fn sub(self, rhs: i64) -> Self::Output {
        Height::new(self.0 - rhs)
    }
}

/// An attempt to decide a block at a given height.
///
/// `Round::NONE` (-1) is used by proof-of-lock rounds, locked rounds, and valid rounds to say "no round".
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Round(i32);

impl Round {
    pub const NONE: Round = Round(-1);

    /// Create a new `Round` with an `int` inner value.
    pub const fn new(int: i32) -> Self {
        Self(int)
    }

    /// Get the inner `i32` value of this `Round`.
    pub const fn int(&self) -> i32 {
        self.0
    }

    /// Whether this round refers to an actual round, i.e., is not [`Round::NONE`] or another negative value.
    pub const fn is_some(&self) -> bool {
        self.0 >= 0
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<i32> for Round {
    type Output = Round;
    fn add(self, rhs: i32) -> Self::Output {
        Round::new(self.0.saturating_add(rhs))
    }
}

impl Sub<Round> for Round {
    type Output = i32;
    fn sub(self, rhs: Round) -> Self::Output {
        self.0 - rhs.0
    }
}

/// 32-byte cryptographic hash. Within this crate these are always SHA256 hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Compute the SHA256 hash of `bytes`.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = CryptoHasher::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[0..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Voting power of a single validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct Power(u64);

impl Power {
    /// Create a new `Power` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Power`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the voting powers of a set of validators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TotalPower(u128);

impl TotalPower {
    /// Create a new `TotalPower` with an `int` inner value.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalPower`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Power> for TotalPower {
    fn add_assign(&mut self, rhs: Power) {
        self.0 += rhs.int() as u128
    }
}

/// Milliseconds since the Unix Epoch. Used wherever a point in time has to be signed or hashed.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub const fn millis(&self) -> u64 {
        self.0
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        Self(millis as u64)
    }
}

impl From<Timestamp> for SystemTime {
    fn from(timestamp: Timestamp) -> Self {
        SystemTime::UNIX_EPOCH + Duration::from_millis(timestamp.0)
    }
}

/// Identifies the peer a message was received from.
///
/// Messages that originate from this replica itself carry [`PeerID::LOCAL`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct PeerID([u8; 32]);

impl PeerID {
    pub const LOCAL: PeerID = PeerID([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for PeerID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if *self == PeerID::LOCAL {
            write!(f, "local")
        } else {
            write!(f, "{}", CryptoHash::new(self.0))
        }
    }
}

/// Arbitrary data, usually transactions, provided by an [`App`](crate::app::App) to be stored in a
/// [`Block`](super::block::Block).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Data(Vec<Datum>);

impl Data {
    /// Create a new `Data` wrapping `datum_vec`.
    pub fn new(datum_vec: Vec<Datum>) -> Self {
        Self(datum_vec)
    }

    /// Get a reference to the inner vector of this `Data`.
    pub const fn vec(&self) -> &Vec<Datum> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hash of the data, stored in a block's header as `data_hash`.
    pub fn hash(&self) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        for datum in &self.0 {
            hasher.update(CryptoHash::digest(datum.bytes()).bytes());
        }
        CryptoHash::new(hasher.finalize().into())
    }
}

/// A single datum (e.g., a transaction) inside a [`Data`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Datum(Vec<u8>);

impl Datum {
    /// Create a new `Datum` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner bytes of this `Datum`.
    pub fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}
