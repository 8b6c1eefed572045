// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

#[cfg(feature = "disk")]
pub mod disk;
pub mod memory;

#[cfg(feature = "disk")]
pub use disk::*;
pub use memory::*;

use crate::primitives::Hash256;
use bincode::error::{DecodeError as BincodeDecodeErr, EncodeError as BincodeEncodeErr};
#[cfg(feature = "disk")]
use rocksdb::Error as RocksDBErr;

pub const SYNC_CHECKPOINT_KEY: &[u8] = b"hashSyncCheckpoint";
pub const CHECKPOINT_PUBKEY_KEY: &[u8] = b"strCheckpointPubKey";

/// Transactional key/value store holding the synchronized checkpoint.
///
/// Writes are only accepted between `txn_begin` and `txn_commit`/`txn_abort`
/// and become visible to reads once committed.
pub trait CheckpointBackend: Send + Sync {
    fn txn_begin(&self) -> Result<(), BackendErr>;

    fn txn_commit(&self) -> Result<(), BackendErr>;

    /// Discards every write staged since `txn_begin`
    fn txn_abort(&self) -> Result<(), BackendErr>;

    /// Stages a write in the open transaction
    fn write_key_val(&self, key: &[u8], val: Vec<u8>) -> Result<(), BackendErr>;

    /// Reads a committed value
    fn get_val(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendErr>;

    fn write_sync_checkpoint(&self, hash: &Hash256) -> Result<(), BackendErr> {
        self.write_key_val(SYNC_CHECKPOINT_KEY, crate::codec::encode_to_vec(hash)?)
    }

    fn read_sync_checkpoint(&self) -> Result<Option<Hash256>, BackendErr> {
        self.get_val(SYNC_CHECKPOINT_KEY)?
            .map(|bytes| crate::codec::decode(&bytes).map_err(BackendErr::from))
            .transpose()
    }

    fn write_checkpoint_pubkey(&self, pubkey: &str) -> Result<(), BackendErr> {
        self.write_key_val(CHECKPOINT_PUBKEY_KEY, crate::codec::encode_to_vec(&pubkey)?)
    }

    fn read_checkpoint_pubkey(&self) -> Result<Option<String>, BackendErr> {
        self.get_val(CHECKPOINT_PUBKEY_KEY)?
            .map(|bytes| crate::codec::decode(&bytes).map_err(BackendErr::from))
            .transpose()
    }
}

#[derive(Debug)]
pub enum BackendErr {
    /// Write attempted outside of a transaction
    NoTransaction,

    /// A transaction is already open
    TransactionInProgress,

    /// Backend data is corrupted
    CorruptData,

    /// Bincode encode error
    BincodeEncode(BincodeEncodeErr),

    /// Bincode decode error
    BincodeDecode(BincodeDecodeErr),

    /// Rocksdb error
    #[cfg(feature = "disk")]
    RocksDB(RocksDBErr),

    /// Generic error
    Error(&'static str),
}

impl From<BincodeEncodeErr> for BackendErr {
    fn from(other: BincodeEncodeErr) -> Self {
        Self::BincodeEncode(other)
    }
}

impl From<BincodeDecodeErr> for BackendErr {
    fn from(other: BincodeDecodeErr) -> Self {
        Self::BincodeDecode(other)
    }
}

#[cfg(feature = "disk")]
impl From<RocksDBErr> for BackendErr {
    fn from(other: RocksDBErr) -> Self {
        Self::RocksDB(other)
    }
}

impl From<&'static str> for BackendErr {
    fn from(other: &'static str) -> Self {
        Self::Error(other)
    }
}
