// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Synchronized checkpoints.
//!
//! A synchronized checkpoint is a block hash signed by the network's master
//! key and broadcast to every node. Once a node has accepted a checkpoint it
//! refuses any block that does not descend from it, which bounds how deep a
//! reorganization can reach.
//!
//! The checkpoint moves through the following states:
//!
//! * No checkpoint: the genesis block is the checkpoint.
//! * Pending: a validly signed checkpoint arrived for a block we do not have.
//!   The block range is requested from the sender.
//! * Accepted: the block is known, descends from the previous checkpoint and
//!   the new checkpoint has been committed to the backend.
//! * Invalid: a signed checkpoint conflicts with the accepted one. The marker
//!   stays set and is reported through [`CheckpointManager::warnings`].

use crate::chain::checkpoints::check_hardened;
use crate::chain::{
    BackendErr, BlockIndex, BlockIndexEntry, BlockIndexErr, ChainConfig, ChainState,
    ChainStateErr, CheckpointBackend,
};
use crate::codec::{decode_wire, encode_wire};
use crate::consensus::*;
use crate::node::{Inventory, NetMessage, Peer};
use crate::primitives::{Hash256, KeyErr, PrivKey, PubKey};
use bincode::error::{DecodeError as BincodeDecodeErr, EncodeError as BincodeEncodeErr};
use bincode::{Decode, Encode};
use log::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use triomphe::Arc;

pub const INCONSISTENT_CHECKPOINT_WARNING: &str = "WARNING: Inconsistent checkpoint found! Stop enforcing checkpoints and notify developers to resolve the issue.";
pub const CHECKPOINT_TOO_OLD_WARNING: &str =
    "WARNING: Checkpoint is too old. Wait for block chain to download, or notify developers.";
pub const CHECKPOINT_VIOLATION_WARNING: &str =
    "syncronized checkpoint violation detected, but skipped!";

/// Signed part of a synchronized checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct UnsignedSyncCheckpoint {
    pub version: i32,
    pub hash_checkpoint: Hash256,
}

impl Default for UnsignedSyncCheckpoint {
    fn default() -> Self {
        Self::new(Hash256::zero())
    }
}

impl UnsignedSyncCheckpoint {
    #[must_use]
    pub fn new(hash_checkpoint: Hash256) -> Self {
        Self {
            version: SYNC_CHECKPOINT_VERSION,
            hash_checkpoint,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.hash_checkpoint.is_zero()
    }
}

/// Synchronized checkpoint as relayed between peers. Only `msg` and `sig`
/// travel on the wire, the unsigned fields are filled in by
/// [`SyncCheckpoint::check_signature`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncCheckpoint {
    unsigned: UnsignedSyncCheckpoint,
    msg: Vec<u8>,
    sig: Vec<u8>,
}

impl SyncCheckpoint {
    /// Unsigned checkpoint at `hash`
    pub fn new(hash: Hash256) -> Result<Self, CheckpointErr> {
        let unsigned = UnsignedSyncCheckpoint::new(hash);

        Ok(Self {
            unsigned,
            msg: encode_wire(&unsigned)?,
            sig: vec![],
        })
    }

    /// Checkpoint received from the network, not yet verified
    #[must_use]
    pub fn from_parts(msg: Vec<u8>, sig: Vec<u8>) -> Self {
        Self {
            unsigned: UnsignedSyncCheckpoint::default(),
            msg,
            sig,
        }
    }

    #[must_use]
    pub fn hash_checkpoint(&self) -> Hash256 {
        self.unsigned.hash_checkpoint
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.unsigned.version
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.unsigned.is_null()
    }

    #[must_use]
    pub fn msg(&self) -> &[u8] {
        &self.msg
    }

    #[must_use]
    pub fn sig(&self) -> &[u8] {
        &self.sig
    }

    /// Identifies the message for relay bookkeeping
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::hash_from_slice([self.msg.as_slice(), self.sig.as_slice()].concat())
    }

    pub fn sign(&mut self, key: &PrivKey) -> Result<(), CheckpointErr> {
        self.sig = key.sign(&Hash256::hash_from_slice(&self.msg))?;
        Ok(())
    }

    /// Verifies `sig` over the double SHA256 of `msg` with the master key,
    /// then decodes `msg` into the unsigned fields.
    pub fn check_signature(&mut self, master: &PubKey) -> Result<(), CheckpointErr> {
        if !master.is_fully_valid() {
            error!("CheckSignature: Invalid master public key {}", master.to_hex());
            return Err(CheckpointErr::InvalidMasterKey);
        }

        if !master.verify(&Hash256::hash_from_slice(&self.msg), &self.sig) {
            error!("CheckSignature: Verify signature failed");
            return Err(CheckpointErr::InvalidSignature);
        }

        self.unsigned = decode_wire(&self.msg)?;
        Ok(())
    }

    /// Sends the checkpoint unless the peer already has it. Returns true if
    /// a message was queued.
    pub fn relay_to(&self, peer: &dyn Peer) -> bool {
        let hash = self.hash_checkpoint();

        if peer.checkpoint_known() == hash {
            return false;
        }

        peer.set_checkpoint_known(hash);
        peer.push_message(NetMessage::Checkpoint(self.clone()));
        true
    }
}

impl Encode for SyncCheckpoint {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), BincodeEncodeErr> {
        bincode::Encode::encode(&self.msg, encoder)?;
        bincode::Encode::encode(&self.sig, encoder)?;

        Ok(())
    }
}

impl<Context> Decode<Context> for SyncCheckpoint {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> core::result::Result<Self, BincodeDecodeErr> {
        let msg = bincode::Decode::decode(decoder)?;
        let sig = bincode::Decode::decode(decoder)?;

        Ok(Self::from_parts(msg, sig))
    }
}

/// What to do with a block that fails [`CheckpointManager::check_sync`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointPolicy {
    /// Reject the block
    #[default]
    Strict,

    /// Accept the block and raise a warning
    Advisory,

    /// Accept the block silently
    Permissive,
}

impl FromStr for CheckpointPolicy {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "advisory" => Ok(Self::Advisory),
            "permissive" => Ok(Self::Permissive),
            _ => Err("invalid checkpoint policy, expected strict, advisory or permissive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The genesis block is the checkpoint
    NoCheckpoint,

    /// Waiting for the block of a received checkpoint
    Pending(Hash256),

    /// Checkpoint accepted and persisted
    Accepted(Hash256),

    /// A conflicting checkpoint was received
    Invalid(Hash256),
}

#[derive(Debug)]
pub enum CheckpointErr {
    /// Signature does not verify against the master key
    InvalidSignature,

    /// Configured master public key is not a valid point
    InvalidMasterKey,

    /// No checkpoint private key is loaded
    NoMasterKey,

    /// Checkpoint is not a descendant or ancestor of the current one
    Conflict(Hash256),

    /// Block index has a broken `prev` link
    CorruptIndex,

    /// Block is not in the block index
    UnknownBlock(Hash256),

    /// Block conflicts with a hardened checkpoint
    HardenedCheckpoint(u64),

    /// Block does not descend from the synchronized checkpoint
    Rejected(Hash256),

    /// Block index error
    BlockIndex(BlockIndexErr),

    /// Chain refused to switch to the checkpointed block
    ChainState(ChainStateErr),

    /// Backend error
    Backend(BackendErr),

    /// Key error
    Key(KeyErr),

    /// No hardened checkpoint is on the main chain to reset to
    ResetFailed,

    /// Bincode encode error
    BincodeEncode(BincodeEncodeErr),

    /// Bincode decode error
    BincodeDecode(BincodeDecodeErr),
}

impl From<BlockIndexErr> for CheckpointErr {
    fn from(other: BlockIndexErr) -> Self {
        match other {
            BlockIndexErr::CorruptIndex => Self::CorruptIndex,
            other => Self::BlockIndex(other),
        }
    }
}

impl From<ChainStateErr> for CheckpointErr {
    fn from(other: ChainStateErr) -> Self {
        Self::ChainState(other)
    }
}

impl From<BackendErr> for CheckpointErr {
    fn from(other: BackendErr) -> Self {
        Self::Backend(other)
    }
}

impl From<KeyErr> for CheckpointErr {
    fn from(other: KeyErr) -> Self {
        Self::Key(other)
    }
}

impl From<BincodeEncodeErr> for CheckpointErr {
    fn from(other: BincodeEncodeErr) -> Self {
        Self::BincodeEncode(other)
    }
}

impl From<BincodeDecodeErr> for CheckpointErr {
    fn from(other: BincodeDecodeErr) -> Self {
        Self::BincodeDecode(other)
    }
}

impl fmt::Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for CheckpointErr {}

struct SyncState {
    hash_sync_checkpoint: Hash256,
    hash_pending_checkpoint: Option<Hash256>,
    hash_invalid_checkpoint: Option<Hash256>,
    checkpoint_message: SyncCheckpoint,
    checkpoint_message_pending: SyncCheckpoint,
    master_key: Option<PrivKey>,
    warning: Option<&'static str>,
}

impl SyncState {
    fn clear_pending(&mut self) {
        self.hash_pending_checkpoint = None;
        self.checkpoint_message_pending = SyncCheckpoint::default();
    }
}

/// Owner of the synchronized checkpoint state of a node.
///
/// Every field lives behind one mutex which is held for the whole of an
/// operation, including the chain switch and the backend write. Block index
/// access goes through references the caller obtained under its own chain
/// lock.
pub struct CheckpointManager<B: CheckpointBackend> {
    config: Arc<ChainConfig>,
    backend: B,
    policy: CheckpointPolicy,
    state: Mutex<SyncState>,
}

impl<B: CheckpointBackend> CheckpointManager<B> {
    /// Manager whose checkpoint is the genesis block. Nothing is persisted.
    pub fn new(config: Arc<ChainConfig>, backend: B, policy: CheckpointPolicy) -> Self {
        let genesis = config.genesis_hash();

        Self {
            config,
            backend,
            policy,
            state: Mutex::new(SyncState {
                hash_sync_checkpoint: genesis,
                hash_pending_checkpoint: None,
                hash_invalid_checkpoint: None,
                checkpoint_message: SyncCheckpoint::default(),
                checkpoint_message_pending: SyncCheckpoint::default(),
                master_key: None,
                warning: None,
            }),
        }
    }

    /// Loads the persisted checkpoint, writing the genesis block if there
    /// is none, then checks that the stored master key matches the
    /// configured one.
    pub fn open<C: ChainState + ?Sized>(
        config: Arc<ChainConfig>,
        backend: B,
        policy: CheckpointPolicy,
        chain: &mut C,
    ) -> Result<Self, CheckpointErr> {
        let manager = Self::new(config, backend, policy);

        match manager.backend.read_sync_checkpoint()? {
            Some(hash) => {
                info!("Loaded sync checkpoint {}", hash);
                manager.state.lock().hash_sync_checkpoint = hash;
            }
            None => {
                info!("No sync checkpoint found, writing genesis block");
                let genesis = manager.config.genesis_hash();
                manager.write_sync_checkpoint(&genesis)?;
            }
        }

        manager.check_checkpoint_pubkey(chain)?;
        Ok(manager)
    }

    #[must_use]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    #[must_use]
    pub fn sync_checkpoint(&self) -> Hash256 {
        self.state.lock().hash_sync_checkpoint
    }

    #[must_use]
    pub fn pending_checkpoint(&self) -> Option<Hash256> {
        self.state.lock().hash_pending_checkpoint
    }

    #[must_use]
    pub fn invalid_checkpoint(&self) -> Option<Hash256> {
        self.state.lock().hash_invalid_checkpoint
    }

    /// Last accepted checkpoint message, null while on the genesis block
    #[must_use]
    pub fn checkpoint_message(&self) -> SyncCheckpoint {
        self.state.lock().checkpoint_message.clone()
    }

    #[must_use]
    pub fn has_master_key(&self) -> bool {
        self.state.lock().master_key.is_some()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let state = self.state.lock();

        if let Some(hash) = state.hash_invalid_checkpoint {
            return SyncStatus::Invalid(hash);
        }

        if let Some(hash) = state.hash_pending_checkpoint {
            return SyncStatus::Pending(hash);
        }

        if state.hash_sync_checkpoint == self.config.genesis_hash() {
            SyncStatus::NoCheckpoint
        } else {
            SyncStatus::Accepted(state.hash_sync_checkpoint)
        }
    }

    /// Block index entry of the current checkpoint
    pub fn last_sync_checkpoint<'a>(
        &self,
        index: &'a BlockIndex,
    ) -> Result<&'a BlockIndexEntry, CheckpointErr> {
        let hash = self.sync_checkpoint();

        index.get(&hash).ok_or_else(|| {
            error!(
                "GetSyncCheckpoint: block index missing for current sync-checkpoint {}",
                hash
            );
            CheckpointErr::UnknownBlock(hash)
        })
    }

    /// Checks `hash` against the current checkpoint.
    ///
    /// Returns `Ok(true)` for a descendant, `Ok(false)` for an ancestor (an
    /// older checkpoint, ignored) and an error for a conflicting block, in
    /// which case the invalid marker is set.
    pub fn validate_sync_checkpoint(
        &self,
        index: &BlockIndex,
        hash: &Hash256,
    ) -> Result<bool, CheckpointErr> {
        let mut state = self.state.lock();
        self.validate_locked(&mut state, index, hash)
    }

    fn validate_locked(
        &self,
        state: &mut SyncState,
        index: &BlockIndex,
        hash: &Hash256,
    ) -> Result<bool, CheckpointErr> {
        let sync = index.get(&state.hash_sync_checkpoint).ok_or_else(|| {
            error!(
                "ValidateSyncCheckpoint: block index missing for current sync-checkpoint {}",
                state.hash_sync_checkpoint
            );
            CheckpointErr::UnknownBlock(state.hash_sync_checkpoint)
        })?;
        let received = index.get(hash).ok_or_else(|| {
            error!(
                "ValidateSyncCheckpoint: block index missing for received sync-checkpoint {}",
                hash
            );
            CheckpointErr::UnknownBlock(*hash)
        })?;

        // Received checkpoint at or below the current one must be its ancestor
        if received.height <= sync.height {
            let ancestor = index.ancestor_at_height(&sync.hash, received.height)?;

            if ancestor.hash != *hash {
                state.hash_invalid_checkpoint = Some(*hash);
                error!(
                    "ValidateSyncCheckpoint: new sync-checkpoint {} is conflicting with current sync-checkpoint {}",
                    hash, sync.hash
                );
                return Err(CheckpointErr::Conflict(*hash));
            }

            return Ok(false);
        }

        let ancestor = index.ancestor_at_height(hash, sync.height)?;

        if ancestor.hash != sync.hash {
            state.hash_invalid_checkpoint = Some(*hash);
            error!(
                "ValidateSyncCheckpoint: new sync-checkpoint {} is not a descendant of current sync-checkpoint {}",
                hash, sync.hash
            );
            return Err(CheckpointErr::Conflict(*hash));
        }

        Ok(true)
    }

    /// Persists `hash` as the checkpoint. The in-memory checkpoint only
    /// changes once the backend transaction has committed.
    pub fn write_sync_checkpoint(&self, hash: &Hash256) -> Result<(), CheckpointErr> {
        let mut state = self.state.lock();
        self.write_locked(&mut state, hash)
    }

    fn write_locked(&self, state: &mut SyncState, hash: &Hash256) -> Result<(), CheckpointErr> {
        self.backend.txn_begin()?;

        if let Err(err) = self.backend.write_sync_checkpoint(hash) {
            error!(
                "WriteSyncCheckpoint: failed to write to db sync checkpoint {}",
                hash
            );

            if self.backend.txn_abort().is_err() {
                error!("WriteSyncCheckpoint: failed to abort transaction");
            }

            return Err(err.into());
        }

        if let Err(err) = self.backend.txn_commit() {
            error!(
                "WriteSyncCheckpoint: failed to commit to db sync checkpoint {}",
                hash
            );
            return Err(err.into());
        }

        state.hash_sync_checkpoint = *hash;
        Ok(())
    }

    /// Promotes the pending checkpoint once its block is known and relays it
    /// to `peers`. Returns true if the checkpoint advanced.
    pub fn accept_pending_sync_checkpoint<C: ChainState + ?Sized>(
        &self,
        chain: &mut C,
        peers: &[&dyn Peer],
    ) -> Result<bool, CheckpointErr> {
        let mut state = self.state.lock();

        let Some(pending) = state.hash_pending_checkpoint else {
            return Ok(false);
        };

        if !chain.block_index().contains(&pending) {
            return Ok(false);
        }

        if !matches!(
            self.validate_locked(&mut state, chain.block_index(), &pending),
            Ok(true)
        ) {
            state.clear_pending();
            return Ok(false);
        }

        if !chain.block_index().is_in_main_chain(&pending) {
            if let Err(err) = chain.set_best_chain(&pending) {
                state.hash_invalid_checkpoint = Some(pending);
                error!(
                    "AcceptPendingSyncCheckpoint: SetBestChain failed for sync checkpoint {}",
                    pending
                );
                return Err(err.into());
            }
        }

        self.write_locked(&mut state, &pending)?;
        state.hash_pending_checkpoint = None;
        let message = std::mem::take(&mut state.checkpoint_message_pending);
        state.checkpoint_message = message;
        info!("AcceptPendingSyncCheckpoint: sync-checkpoint at {}", pending);

        if !state.checkpoint_message.is_null() {
            for peer in peers {
                state.checkpoint_message.relay_to(*peer);
            }
        }

        Ok(true)
    }

    /// Most recent block that lags the tip by at least `CHECKPOINT_SPAN`
    /// blocks and `CHECKPOINT_MAX_SPAN` seconds.
    #[must_use]
    pub fn auto_select_sync_checkpoint(&self, index: &BlockIndex) -> Hash256 {
        let best = index.best();
        let mut entry = best;

        while let Some(prev) = entry.prev.and_then(|prev| index.get(&prev)) {
            if entry.time + CHECKPOINT_MAX_SPAN > best.time
                || entry.height + CHECKPOINT_SPAN > best.height
            {
                entry = prev;
            } else {
                break;
            }
        }

        entry.hash
    }

    /// Checks that a new block with parent `prev` is compatible with the
    /// checkpoint. During initial download only blocks above the
    /// auto-selected checkpoint pass.
    #[must_use]
    pub fn check_sync(
        &self,
        index: &BlockIndex,
        hash: &Hash256,
        prev: &Hash256,
        initial_download: bool,
    ) -> bool {
        if !self.config.enforce_sync_checkpoints() {
            return true;
        }

        let Some(prev) = index.get(prev) else {
            error!("CheckSync: unknown parent {} of block {}", prev, hash);
            return false;
        };
        let height = prev.height + 1;

        if initial_download {
            let auto = self.auto_select_sync_checkpoint(index);
            return index.get(&auto).map_or(false, |auto| height > auto.height);
        }

        let state = self.state.lock();
        let Some(sync) = index.get(&state.hash_sync_checkpoint) else {
            error!(
                "CheckSync: block index missing for current sync-checkpoint {}",
                state.hash_sync_checkpoint
            );
            return false;
        };

        if height > sync.height {
            // Only descendants of the checkpoint pass
            return match index.ancestor_at_height(&prev.hash, sync.height) {
                Ok(ancestor) => ancestor.hash == sync.hash,
                Err(_) => {
                    error!("CheckSync: pprev null - block index structure failure");
                    false
                }
            };
        }

        if height == sync.height {
            return *hash == sync.hash;
        }

        index.contains(hash)
    }

    /// Checks a new block against the hardened checkpoints and the
    /// synchronized checkpoint, applying the configured policy to the latter.
    pub fn accept_block(
        &self,
        index: &BlockIndex,
        hash: &Hash256,
        prev: &Hash256,
        initial_download: bool,
    ) -> Result<(), CheckpointErr> {
        let height = index
            .get(prev)
            .ok_or(CheckpointErr::UnknownBlock(*prev))?
            .height
            + 1;

        if !check_hardened(&self.config, height, hash) {
            error!(
                "AcceptBlock: rejected by hardened checkpoint lock-in at {}",
                height
            );
            return Err(CheckpointErr::HardenedCheckpoint(height));
        }

        if self.check_sync(index, hash, prev, initial_download) {
            return Ok(());
        }

        match self.policy {
            CheckpointPolicy::Strict => {
                error!("AcceptBlock: rejected by synchronized checkpoint {}", hash);
                Err(CheckpointErr::Rejected(*hash))
            }
            CheckpointPolicy::Advisory => {
                warn!("AcceptBlock: {}", CHECKPOINT_VIOLATION_WARNING);
                self.state.lock().warning = Some(CHECKPOINT_VIOLATION_WARNING);
                Ok(())
            }
            CheckpointPolicy::Permissive => Ok(()),
        }
    }

    /// True if `hash` is the pending checkpoint or the block the pending
    /// checkpoint's orphan chain is waiting for
    #[must_use]
    pub fn wanted_by_pending_sync_checkpoint(&self, index: &BlockIndex, hash: &Hash256) -> bool {
        let Some(pending) = self.pending_checkpoint() else {
            return false;
        };

        if *hash == pending {
            return true;
        }

        index.is_orphan(&pending) && index.wanted_by_orphan(&pending) == Some(*hash)
    }

    /// Rolls the checkpoint back to the latest hardened checkpoint on the
    /// main chain. An unknown last hardened checkpoint becomes pending.
    pub fn reset_sync_checkpoint<C: ChainState + ?Sized>(
        &self,
        chain: &mut C,
    ) -> Result<bool, CheckpointErr> {
        let mut state = self.state.lock();

        if let Some((_, &hash)) = self.config.checkpoints().iter().next_back() {
            let known = chain.block_index().contains(&hash);

            if known && !chain.block_index().is_in_main_chain(&hash) {
                info!("ResetSyncCheckpoint: SetBestChain to hardened checkpoint {}", hash);

                if let Err(err) = chain.set_best_chain(&hash) {
                    error!(
                        "ResetSyncCheckpoint: SetBestChain failed for hardened checkpoint {}",
                        hash
                    );
                    return Err(err.into());
                }
            } else if !known {
                info!("ResetSyncCheckpoint: pending for sync-checkpoint {}", hash);
                state.hash_pending_checkpoint = Some(hash);
                state.checkpoint_message_pending = SyncCheckpoint::default();
            }
        }

        for hash in self.config.checkpoints().values().rev() {
            if chain.block_index().is_in_main_chain(hash) {
                self.write_locked(&mut state, hash)?;
                info!("ResetSyncCheckpoint: sync-checkpoint reset to {}", hash);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Requests the block of the pending checkpoint from `peer` unless it is
    /// known or held as an orphan. Returns true if a request was queued.
    pub fn ask_for_pending_sync_checkpoint(&self, index: &BlockIndex, peer: &dyn Peer) -> bool {
        let Some(pending) = self.pending_checkpoint() else {
            return false;
        };

        if index.contains(&pending) || index.is_orphan(&pending) {
            return false;
        }

        peer.ask_for(Inventory::block(pending));
        true
    }

    /// Stores the configured master public key and resets the checkpoint if
    /// it changed.
    pub fn check_checkpoint_pubkey<C: ChainState + ?Sized>(
        &self,
        chain: &mut C,
    ) -> Result<(), CheckpointErr> {
        let expected = self.config.master_pubkey().to_hex();

        if self.backend.read_checkpoint_pubkey()?.as_deref() == Some(expected.as_str()) {
            return Ok(());
        }

        self.backend.txn_begin()?;

        if let Err(err) = self.backend.write_checkpoint_pubkey(&expected) {
            error!("CheckCheckpointPubKey: failed to write new checkpoint master key to db");

            if self.backend.txn_abort().is_err() {
                error!("CheckCheckpointPubKey: failed to abort transaction");
            }

            return Err(err.into());
        }

        self.backend.txn_commit()?;
        info!("CheckCheckpointPubKey: checkpoint master key changed to {}", expected);

        if !self.config.is_testnet() && !self.reset_sync_checkpoint(chain)? {
            error!("CheckCheckpointPubKey: failed to reset sync-checkpoint");
            return Err(CheckpointErr::ResetFailed);
        }

        Ok(())
    }

    /// Loads the checkpoint signing key after a test signature
    pub fn set_checkpoint_priv_key(&self, secret_hex: &str) -> Result<(), CheckpointErr> {
        let key = PrivKey::from_hex(secret_hex, self.config.master_pubkey().is_compressed())?;
        let mut test_msg = SyncCheckpoint::new(self.config.genesis_hash())?;
        test_msg.sign(&key)?;

        if key.pub_key()? != *self.config.master_pubkey() {
            warn!("Checkpoint private key does not match the master public key");
        }

        self.state.lock().master_key = Some(key);
        Ok(())
    }

    /// Signs a checkpoint at `hash`, processes it locally and relays it to
    /// `peers`. Returns true if the checkpoint advanced.
    pub fn send_sync_checkpoint<C: ChainState + ?Sized>(
        &self,
        chain: &mut C,
        hash: &Hash256,
        peers: &[&dyn Peer],
    ) -> Result<bool, CheckpointErr> {
        let key = self.state.lock().master_key.clone().ok_or_else(|| {
            error!("SendSyncCheckpoint: Checkpoint master key unavailable");
            CheckpointErr::NoMasterKey
        })?;

        let mut checkpoint = SyncCheckpoint::new(*hash)?;
        checkpoint.sign(&key)?;

        if !self.process_sync_checkpoint(chain, checkpoint.clone(), None)? {
            warn!("SendSyncCheckpoint: Failed to process checkpoint {}", hash);
            return Ok(false);
        }

        for peer in peers {
            checkpoint.relay_to(*peer);
        }

        Ok(true)
    }

    /// Handles a checkpoint received from `from`, or produced locally when
    /// `from` is `None`.
    ///
    /// Messages with a bad signature are dropped. A checkpoint for an
    /// unknown block becomes pending and the missing blocks are requested
    /// from the sender. Returns true if the checkpoint advanced.
    pub fn process_sync_checkpoint<C: ChainState + ?Sized>(
        &self,
        chain: &mut C,
        mut checkpoint: SyncCheckpoint,
        from: Option<&dyn Peer>,
    ) -> Result<bool, CheckpointErr> {
        if checkpoint.check_signature(self.config.master_pubkey()).is_err() {
            return Ok(false);
        }

        let hash = checkpoint.hash_checkpoint();
        let mut state = self.state.lock();

        if !chain.block_index().contains(&hash) {
            state.hash_pending_checkpoint = Some(hash);
            state.checkpoint_message_pending = checkpoint;
            debug!("ProcessSyncCheckpoint: pending for sync-checkpoint {}", hash);

            if let Some(peer) = from {
                let index = chain.block_index();
                peer.push_get_blocks(&index.best().hash, &hash);
                let wanted = index.wanted_by_orphan(&hash).unwrap_or(hash);
                peer.ask_for(Inventory::block(wanted));
            }

            return Ok(false);
        }

        if !self.validate_locked(&mut state, chain.block_index(), &hash)? {
            return Ok(false);
        }

        if !chain.block_index().is_in_main_chain(&hash) {
            if let Err(err) = chain.set_best_chain(&hash) {
                state.hash_invalid_checkpoint = Some(hash);
                error!(
                    "ProcessSyncCheckpoint: SetBestChain failed for sync checkpoint {}",
                    hash
                );
                return Err(err.into());
            }
        }

        self.write_locked(&mut state, &hash)?;
        state.checkpoint_message = checkpoint;
        state.clear_pending();
        info!("ProcessSyncCheckpoint: sync-checkpoint at {}", hash);
        Ok(true)
    }

    /// Hook run after a block has been processed. Accepts the pending
    /// checkpoint and, on the node holding the master key, broadcasts a
    /// fresh auto-selected checkpoint.
    pub fn block_processed<C: ChainState + ?Sized>(
        &self,
        chain: &mut C,
        peers: &[&dyn Peer],
        now: i64,
    ) -> Result<(), CheckpointErr> {
        self.accept_pending_sync_checkpoint(chain, peers)?;

        if !self.has_master_key()
            || chain
                .block_index()
                .is_initial_block_download(&self.config, now)
        {
            return Ok(());
        }

        let hash = self.auto_select_sync_checkpoint(chain.block_index());

        if hash != self.sync_checkpoint() {
            self.send_sync_checkpoint(chain, &hash, peers)?;
        }

        Ok(())
    }

    /// True once the checkpoint is buried by `COINBASE_MATURITY` blocks or
    /// older than `STAKE_MIN_AGE`
    #[must_use]
    pub fn is_mature_sync_checkpoint(&self, index: &BlockIndex, now: i64) -> bool {
        let Ok(sync) = self.last_sync_checkpoint(index) else {
            return false;
        };

        index.best_height() >= sync.height + COINBASE_MATURITY || sync.time + STAKE_MIN_AGE < now
    }

    #[must_use]
    pub fn is_sync_checkpoint_too_old(&self, index: &BlockIndex, secs: i64, now: i64) -> bool {
        self.last_sync_checkpoint(index)
            .map_or(false, |sync| sync.time + secs < now)
    }

    /// Highest priority checkpoint warning, if any
    #[must_use]
    pub fn warnings(&self, index: &BlockIndex, now: i64) -> Option<&'static str> {
        if self.invalid_checkpoint().is_some() {
            return Some(INCONSISTENT_CHECKPOINT_WARNING);
        }

        if !self.config.is_testnet()
            && !index.is_initial_block_download(&self.config, now)
            && self.is_sync_checkpoint_too_old(index, CHECKPOINT_TOO_OLD_SECS, now)
        {
            return Some(CHECKPOINT_TOO_OLD_WARNING);
        }

        self.state.lock().warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::block_index::tests::{block_hash, cut_prev, extend};
    use crate::chain::MemoryBackend;
    use crate::node::PeerHandle;
    use crossbeam_channel::Receiver;
    use std::sync::atomic::{AtomicBool, Ordering};

    const T0: i64 = 1_600_000_000;

    struct Fixture {
        key: PrivKey,
        config: Arc<ChainConfig>,
        index: BlockIndex,
        main: Vec<Hash256>,
    }

    /// Mainnet style network with a fresh master key and a main chain of
    /// `len` blocks on top of genesis
    fn fixture(len: u64) -> Fixture {
        let key = PrivKey::make_new_key(false);
        let genesis = block_hash(0, 0);
        let config = ChainConfig::new("mainnet")
            .with_genesis(genesis, T0)
            .with_checkpoints([(0, genesis)])
            .with_master_pubkey(key.pub_key().unwrap());
        let mut index = BlockIndex::from_config(&config);
        let main = extend(&mut index, genesis, 0, len);
        index.set_best_chain(&main[main.len() - 1]).unwrap();

        Fixture {
            key,
            config: Arc::new(config),
            index,
            main,
        }
    }

    fn at(main: &[Hash256], height: u64) -> Hash256 {
        main[height as usize - 1]
    }

    fn signed(key: &PrivKey, hash: Hash256) -> SyncCheckpoint {
        let mut checkpoint = SyncCheckpoint::new(hash).unwrap();
        checkpoint.sign(key).unwrap();
        SyncCheckpoint::from_parts(checkpoint.msg().to_vec(), checkpoint.sig().to_vec())
    }

    fn open<B: CheckpointBackend>(f: &mut Fixture, backend: B) -> CheckpointManager<B> {
        CheckpointManager::open(f.config.clone(), backend, CheckpointPolicy::Strict, &mut f.index)
            .unwrap()
    }

    fn drain(receiver: &Receiver<NetMessage>) -> Vec<NetMessage> {
        receiver.try_iter().collect()
    }

    /// Backend whose commits can be made to fail
    #[derive(Default)]
    struct FailingBackend {
        inner: MemoryBackend,
        fail_commit: AtomicBool,
    }

    impl CheckpointBackend for FailingBackend {
        fn txn_begin(&self) -> Result<(), BackendErr> {
            self.inner.txn_begin()
        }

        fn txn_commit(&self) -> Result<(), BackendErr> {
            if self.fail_commit.load(Ordering::Relaxed) {
                self.inner.txn_abort()?;
                return Err(BackendErr::Error("commit failed"));
            }

            self.inner.txn_commit()
        }

        fn txn_abort(&self) -> Result<(), BackendErr> {
            self.inner.txn_abort()
        }

        fn write_key_val(&self, key: &[u8], val: Vec<u8>) -> Result<(), BackendErr> {
            self.inner.write_key_val(key, val)
        }

        fn get_val(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendErr> {
            self.inner.get_val(key)
        }
    }

    /// Chain that refuses every reorganization
    struct StubbornChain(BlockIndex);

    impl ChainState for StubbornChain {
        fn block_index(&self) -> &BlockIndex {
            &self.0
        }

        fn set_best_chain(&mut self, _hash: &Hash256) -> Result<(), ChainStateErr> {
            Err(ChainStateErr::Rejected("reorganization refused"))
        }
    }

    #[test]
    fn open_writes_genesis_and_master_key() {
        let mut f = fixture(10);
        let backend = MemoryBackend::new();
        let manager = open(&mut f, backend.clone());

        assert_eq!(manager.sync_checkpoint(), f.config.genesis_hash());
        assert_eq!(manager.status(), SyncStatus::NoCheckpoint);
        assert_eq!(
            backend.read_sync_checkpoint().unwrap(),
            Some(f.config.genesis_hash())
        );
        assert_eq!(
            backend.read_checkpoint_pubkey().unwrap(),
            Some(f.config.master_pubkey().to_hex())
        );
        assert!(manager.checkpoint_message().is_null());
    }

    #[test]
    fn open_loads_persisted_checkpoint() {
        let mut f = fixture(10);
        let backend = MemoryBackend::new();
        let manager = open(&mut f, backend.clone());
        manager.write_sync_checkpoint(&at(&f.main, 5)).unwrap();
        drop(manager);

        let manager = open(&mut f, backend);
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 5));
        assert_eq!(manager.status(), SyncStatus::Accepted(at(&f.main, 5)));
    }

    #[test]
    fn master_key_change_resets_checkpoint() {
        let mut f = fixture(10);
        let backend = MemoryBackend::new();
        let manager = open(&mut f, backend.clone());
        manager.write_sync_checkpoint(&at(&f.main, 5)).unwrap();
        backend.txn_begin().unwrap();
        backend.write_checkpoint_pubkey("00").unwrap();
        backend.txn_commit().unwrap();

        let manager = open(&mut f, backend.clone());
        assert_eq!(manager.sync_checkpoint(), f.config.genesis_hash());
        assert_eq!(
            backend.read_checkpoint_pubkey().unwrap(),
            Some(f.config.master_pubkey().to_hex())
        );
    }

    #[test]
    fn it_advances_to_descendant_checkpoints() {
        let mut f = fixture(200);
        let manager = open(&mut f, MemoryBackend::new());

        let checkpoint = signed(&f.key, at(&f.main, 100));
        assert!(manager
            .process_sync_checkpoint(&mut f.index, checkpoint, None)
            .unwrap());
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 100));
        assert_eq!(manager.status(), SyncStatus::Accepted(at(&f.main, 100)));
        assert_eq!(manager.checkpoint_message().hash_checkpoint(), at(&f.main, 100));
        assert_eq!(manager.checkpoint_message().version(), SYNC_CHECKPOINT_VERSION);

        let checkpoint = signed(&f.key, at(&f.main, 150));
        assert!(manager
            .process_sync_checkpoint(&mut f.index, checkpoint, None)
            .unwrap());
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 150));
    }

    #[test]
    fn it_ignores_older_ancestor_checkpoints() {
        let mut f = fixture(200);
        let manager = open(&mut f, MemoryBackend::new());
        manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();

        assert!(!manager
            .validate_sync_checkpoint(&f.index, &at(&f.main, 50))
            .unwrap());
        assert!(!manager
            .process_sync_checkpoint(&mut f.index, signed(&f.key, at(&f.main, 50)), None)
            .unwrap());
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 100));
        assert_eq!(manager.invalid_checkpoint(), None);
    }

    #[test]
    fn it_rejects_older_conflicting_checkpoints() {
        let mut f = fixture(200);
        let fork = extend(&mut f.index, at(&f.main, 40), 1, 20);
        let manager = open(&mut f, MemoryBackend::new());
        manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();

        // fork[9] is at height 50
        let result = manager.process_sync_checkpoint(&mut f.index, signed(&f.key, fork[9]), None);
        assert!(matches!(result, Err(CheckpointErr::Conflict(h)) if h == fork[9]));
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 100));
        assert_eq!(manager.invalid_checkpoint(), Some(fork[9]));
        assert_eq!(manager.status(), SyncStatus::Invalid(fork[9]));
        assert_eq!(
            manager.warnings(&f.index, T0),
            Some(INCONSISTENT_CHECKPOINT_WARNING)
        );
    }

    #[test]
    fn it_rejects_newer_conflicting_checkpoints() {
        let mut f = fixture(200);
        let fork = extend(&mut f.index, at(&f.main, 90), 1, 60);
        let manager = open(&mut f, MemoryBackend::new());
        manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();

        let fork_tip = fork[59];
        assert_eq!(f.index.get(&fork_tip).unwrap().height, 150);

        let result = manager.validate_sync_checkpoint(&f.index, &fork_tip);
        assert!(matches!(result, Err(CheckpointErr::Conflict(_))));
        assert_eq!(manager.invalid_checkpoint(), Some(fork_tip));
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 100));
    }

    #[test]
    fn it_requires_indexed_checkpoints() {
        let mut f = fixture(20);
        let manager = open(&mut f, MemoryBackend::new());
        let orphan_index = BlockIndex::with_genesis(block_hash(7, 0), T0);

        assert!(matches!(
            manager.validate_sync_checkpoint(&orphan_index, &block_hash(7, 0)),
            Err(CheckpointErr::UnknownBlock(_))
        ));
    }

    #[test]
    fn failed_commit_keeps_checkpoint() {
        let mut f = fixture(200);
        let backend = FailingBackend::default();
        let manager = open(&mut f, backend);
        manager.backend().fail_commit.store(true, Ordering::Relaxed);

        let result =
            manager.process_sync_checkpoint(&mut f.index, signed(&f.key, at(&f.main, 100)), None);
        assert!(matches!(result, Err(CheckpointErr::Backend(_))));
        assert_eq!(manager.sync_checkpoint(), f.config.genesis_hash());
        assert_eq!(
            manager.backend().read_sync_checkpoint().unwrap(),
            Some(f.config.genesis_hash())
        );

        manager.backend().fail_commit.store(false, Ordering::Relaxed);
        assert!(manager
            .process_sync_checkpoint(&mut f.index, signed(&f.key, at(&f.main, 100)), None)
            .unwrap());
    }

    #[test]
    fn it_drops_badly_signed_checkpoints() {
        let mut f = fixture(200);
        let manager = open(&mut f, MemoryBackend::new());
        let (peer, receiver) = PeerHandle::new(1);

        let forged = signed(&PrivKey::make_new_key(false), at(&f.main, 100));
        assert!(!manager
            .process_sync_checkpoint(&mut f.index, forged, Some(&peer))
            .unwrap());

        let good = signed(&f.key, at(&f.main, 100));
        let mut msg = good.msg().to_vec();
        msg[10] ^= 1;
        let tampered = SyncCheckpoint::from_parts(msg, good.sig().to_vec());
        assert!(!manager
            .process_sync_checkpoint(&mut f.index, tampered, Some(&peer))
            .unwrap());

        assert_eq!(manager.status(), SyncStatus::NoCheckpoint);
        assert!(drain(&receiver).is_empty());
    }

    #[test]
    fn unknown_checkpoint_becomes_pending_then_accepted() {
        let mut f = fixture(100);
        let manager = open(&mut f, MemoryBackend::new());
        let (sender, sender_rx) = PeerHandle::new(1);
        let (other, other_rx) = PeerHandle::new(2);
        let tip = at(&f.main, 100);
        let wanted = block_hash(0, 120);

        assert!(!manager
            .process_sync_checkpoint(&mut f.index, signed(&f.key, wanted), Some(&sender))
            .unwrap());
        assert_eq!(manager.status(), SyncStatus::Pending(wanted));
        assert_eq!(
            drain(&sender_rx),
            vec![
                NetMessage::GetBlocks {
                    from: tip,
                    stop: wanted
                },
                NetMessage::GetData(vec![Inventory::block(wanted)]),
            ]
        );
        assert!(manager.wanted_by_pending_sync_checkpoint(&f.index, &wanted));
        assert!(!manager.wanted_by_pending_sync_checkpoint(&f.index, &tip));

        // Block not there yet
        assert!(!manager
            .accept_pending_sync_checkpoint(&mut f.index, &[&other])
            .unwrap());

        let new_blocks = extend(&mut f.index, tip, 0, 30);
        assert_eq!(new_blocks[19], wanted);
        assert!(manager
            .accept_pending_sync_checkpoint(&mut f.index, &[&other])
            .unwrap());
        assert_eq!(manager.sync_checkpoint(), wanted);
        assert_eq!(manager.pending_checkpoint(), None);
        assert!(f.index.is_in_main_chain(&wanted));

        let relayed = drain(&other_rx);
        assert_eq!(relayed.len(), 1);
        assert!(matches!(&relayed[0], NetMessage::Checkpoint(c) if c.hash_checkpoint() == wanted));
    }

    #[test]
    fn pending_checkpoint_waits_for_orphan_parent() {
        let mut f = fixture(10);
        let manager = open(&mut f, MemoryBackend::new());
        let (peer, receiver) = PeerHandle::new(1);
        let missing = block_hash(0, 11);
        let o12 = block_hash(0, 12);
        let o13 = block_hash(0, 13);
        f.index.add_orphan(o12, missing);
        f.index.add_orphan(o13, o12);

        assert!(!manager
            .process_sync_checkpoint(&mut f.index, signed(&f.key, o13), Some(&peer))
            .unwrap());
        let messages = drain(&receiver);
        assert_eq!(
            messages[1],
            NetMessage::GetData(vec![Inventory::block(missing)])
        );
        assert!(manager.wanted_by_pending_sync_checkpoint(&f.index, &missing));
        assert!(!manager.ask_for_pending_sync_checkpoint(&f.index, &peer));
    }

    #[test]
    fn it_asks_for_unknown_pending_blocks() {
        let mut f = fixture(10);
        let manager = open(&mut f, MemoryBackend::new());
        let (peer, receiver) = PeerHandle::new(1);
        assert!(!manager.ask_for_pending_sync_checkpoint(&f.index, &peer));

        let wanted = block_hash(0, 11);
        manager
            .process_sync_checkpoint(&mut f.index, signed(&f.key, wanted), None)
            .unwrap();
        assert!(manager.ask_for_pending_sync_checkpoint(&f.index, &peer));
        assert_eq!(
            drain(&receiver),
            vec![NetMessage::GetData(vec![Inventory::block(wanted)])]
        );

        extend(&mut f.index, at(&f.main, 10), 0, 1);
        assert!(!manager.ask_for_pending_sync_checkpoint(&f.index, &peer));
    }

    #[test]
    fn conflicting_pending_checkpoint_is_discarded() {
        let mut f = fixture(100);
        let fork = extend(&mut f.index, at(&f.main, 10), 1, 30);
        let manager = open(&mut f, MemoryBackend::new());
        manager.write_sync_checkpoint(&at(&f.main, 50)).unwrap();

        let unknown = block_hash(1, 41);
        manager
            .process_sync_checkpoint(&mut f.index, signed(&f.key, unknown), None)
            .unwrap();
        assert_eq!(manager.pending_checkpoint(), Some(unknown));

        extend(&mut f.index, fork[29], 1, 1);
        assert!(!manager
            .accept_pending_sync_checkpoint(&mut f.index, &[])
            .unwrap());
        assert_eq!(manager.pending_checkpoint(), None);
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 50));
    }

    #[test]
    fn it_switches_to_checkpointed_side_chain() {
        let mut f = fixture(100);
        let fork = extend(&mut f.index, at(&f.main, 60), 1, 50);
        let manager = open(&mut f, MemoryBackend::new());

        assert!(manager
            .process_sync_checkpoint(&mut f.index, signed(&f.key, fork[9]), None)
            .unwrap());
        assert!(f.index.is_in_main_chain(&fork[9]));
        assert_eq!(f.index.best().hash, fork[9]);
        assert!(!f.index.is_in_main_chain(&at(&f.main, 61)));
    }

    #[test]
    fn failed_chain_switch_marks_checkpoint_invalid() {
        let mut f = fixture(100);
        let fork = extend(&mut f.index, at(&f.main, 60), 1, 50);
        let manager = open(&mut f, MemoryBackend::new());
        let mut chain = StubbornChain(f.index.clone());

        let result = manager.process_sync_checkpoint(&mut chain, signed(&f.key, fork[9]), None);
        assert!(matches!(result, Err(CheckpointErr::ChainState(_))));
        assert_eq!(manager.invalid_checkpoint(), Some(fork[9]));
        assert_eq!(manager.sync_checkpoint(), f.config.genesis_hash());
    }

    #[test]
    fn check_sync_enforces_descendants() {
        let mut f = fixture(200);
        let fork = extend(&mut f.index, at(&f.main, 90), 1, 30);
        let manager = open(&mut f, MemoryBackend::new());
        manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();
        let new_block = block_hash(5, 1);

        // Same height, different hash
        assert!(!manager.check_sync(&f.index, &new_block, &at(&f.main, 99), false));
        assert!(manager.check_sync(&f.index, &at(&f.main, 100), &at(&f.main, 99), false));

        // Above the checkpoint
        assert!(manager.check_sync(&f.index, &new_block, &at(&f.main, 120), false));
        assert!(!manager.check_sync(&f.index, &new_block, &fork[15], false));

        // Below the checkpoint only known blocks pass
        assert!(!manager.check_sync(&f.index, &new_block, &at(&f.main, 50), false));
        assert!(manager.check_sync(&f.index, &at(&f.main, 51), &at(&f.main, 50), false));

        assert!(!manager.check_sync(&f.index, &new_block, &block_hash(9, 9), false));
    }

    #[test]
    fn broken_prev_link_fails_validation_without_moving_markers() {
        let mut f = fixture(200);
        let manager = open(&mut f, MemoryBackend::new());
        manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();
        cut_prev(&mut f.index, &at(&f.main, 120));

        assert!(matches!(
            manager.validate_sync_checkpoint(&f.index, &at(&f.main, 150)),
            Err(CheckpointErr::CorruptIndex)
        ));
        assert!(!manager.check_sync(&f.index, &block_hash(5, 1), &at(&f.main, 150), false));
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 100));
        assert_eq!(manager.invalid_checkpoint(), None);

        // Older checkpoints walk down from the current one
        manager.write_sync_checkpoint(&at(&f.main, 150)).unwrap();
        assert!(matches!(
            manager.validate_sync_checkpoint(&f.index, &at(&f.main, 110)),
            Err(CheckpointErr::CorruptIndex)
        ));
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 150));
        assert_eq!(manager.invalid_checkpoint(), None);
    }

    #[test]
    fn changed_master_key_without_reset_target_fails() {
        let mut f = fixture(20);
        let config = Arc::new(
            (*f.config)
                .clone()
                .with_checkpoints([(0, block_hash(9, 0))]),
        );
        let result = CheckpointManager::open(
            config,
            MemoryBackend::new(),
            CheckpointPolicy::Strict,
            &mut f.index,
        );
        assert!(matches!(result, Err(CheckpointErr::ResetFailed)));

        // The same key already on record needs no reset
        let backend = MemoryBackend::new();
        backend.txn_begin().unwrap();
        backend
            .write_checkpoint_pubkey(&f.config.master_pubkey().to_hex())
            .unwrap();
        backend.txn_commit().unwrap();
        let config = Arc::new(
            (*f.config)
                .clone()
                .with_checkpoints([(0, block_hash(9, 0))]),
        );
        let manager =
            CheckpointManager::open(config, backend, CheckpointPolicy::Strict, &mut f.index);
        assert!(manager.is_ok());
    }

    #[test]
    fn check_sync_is_disabled_on_testnet() {
        let mut f = fixture(200);
        let config = Arc::new(
            ChainConfig::new("testnet")
                .with_genesis(f.config.genesis_hash(), T0)
                .with_checkpoints([(0, f.config.genesis_hash())])
                .with_master_pubkey(*f.config.master_pubkey()),
        );
        let manager = CheckpointManager::open(
            config,
            MemoryBackend::new(),
            CheckpointPolicy::Strict,
            &mut f.index,
        )
        .unwrap();
        manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();

        assert!(manager.check_sync(&f.index, &block_hash(5, 1), &at(&f.main, 99), false));
    }

    #[test]
    fn check_sync_during_initial_download_uses_auto_checkpoint() {
        let mut f = fixture(500);
        let manager = open(&mut f, MemoryBackend::new());

        let auto = manager.auto_select_sync_checkpoint(&f.index);
        assert_eq!(auto, at(&f.main, 300));

        let new_block = block_hash(5, 1);
        assert!(!manager.check_sync(&f.index, &new_block, &at(&f.main, 299), true));
        assert!(manager.check_sync(&f.index, &new_block, &at(&f.main, 300), true));
    }

    #[test]
    fn auto_select_stops_at_genesis() {
        let mut f = fixture(50);
        let manager = open(&mut f, MemoryBackend::new());
        assert_eq!(
            manager.auto_select_sync_checkpoint(&f.index),
            f.config.genesis_hash()
        );
    }

    #[test]
    fn accept_block_applies_policy() {
        let mut f = fixture(200);
        let new_block = block_hash(5, 1);

        for (policy, accepted, warning) in [
            (CheckpointPolicy::Strict, false, None),
            (
                CheckpointPolicy::Advisory,
                true,
                Some(CHECKPOINT_VIOLATION_WARNING),
            ),
            (CheckpointPolicy::Permissive, true, None),
        ] {
            let backend = MemoryBackend::new();
            let manager =
                CheckpointManager::open(f.config.clone(), backend, policy, &mut f.index).unwrap();
            manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();

            let tip_time = f.index.best().time;
            let result = manager.accept_block(&f.index, &new_block, &at(&f.main, 99), false);
            assert_eq!(result.is_ok(), accepted);
            assert_eq!(manager.warnings(&f.index, tip_time), warning);
        }
    }

    #[test]
    fn accept_block_checks_hardened_checkpoints() {
        let f = fixture(200);
        let config = Arc::new(
            (*f.config)
                .clone()
                .with_checkpoints([(0, f.config.genesis_hash()), (150, at(&f.main, 150))]),
        );
        let manager =
            CheckpointManager::new(config, MemoryBackend::new(), CheckpointPolicy::Strict);

        assert!(matches!(
            manager.accept_block(&f.index, &block_hash(5, 1), &at(&f.main, 149), false),
            Err(CheckpointErr::HardenedCheckpoint(150))
        ));
        assert!(manager
            .accept_block(&f.index, &at(&f.main, 150), &at(&f.main, 149), false)
            .is_ok());
    }

    #[test]
    fn reset_returns_to_last_hardened_checkpoint() {
        let mut f = fixture(200);
        let config = Arc::new(
            (*f.config)
                .clone()
                .with_checkpoints([(0, f.config.genesis_hash()), (80, at(&f.main, 80))]),
        );
        let manager =
            CheckpointManager::new(config, MemoryBackend::new(), CheckpointPolicy::Strict);
        manager.write_sync_checkpoint(&at(&f.main, 150)).unwrap();

        assert!(manager.reset_sync_checkpoint(&mut f.index).unwrap());
        assert_eq!(manager.sync_checkpoint(), at(&f.main, 80));
        assert_eq!(manager.pending_checkpoint(), None);
    }

    #[test]
    fn reset_with_unknown_hardened_checkpoint_goes_pending() {
        let mut f = fixture(50);
        let future = block_hash(0, 80);
        let config = Arc::new(
            (*f.config)
                .clone()
                .with_checkpoints([(0, f.config.genesis_hash()), (80, future)]),
        );
        let manager =
            CheckpointManager::new(config, MemoryBackend::new(), CheckpointPolicy::Strict);
        manager.write_sync_checkpoint(&at(&f.main, 40)).unwrap();

        assert!(manager.reset_sync_checkpoint(&mut f.index).unwrap());
        assert_eq!(manager.pending_checkpoint(), Some(future));
        assert_eq!(manager.sync_checkpoint(), f.config.genesis_hash());
    }

    #[test]
    fn reset_switches_to_hardened_side_chain() {
        let mut f = fixture(100);
        let fork = extend(&mut f.index, at(&f.main, 20), 1, 40);
        let config = Arc::new(
            (*f.config)
                .clone()
                .with_checkpoints([(0, f.config.genesis_hash()), (50, fork[29])]),
        );
        let manager =
            CheckpointManager::new(config, MemoryBackend::new(), CheckpointPolicy::Strict);

        assert!(manager.reset_sync_checkpoint(&mut f.index).unwrap());
        assert_eq!(f.index.best().hash, fork[29]);
        assert_eq!(manager.sync_checkpoint(), fork[29]);
    }

    #[test]
    fn master_node_broadcasts_auto_selected_checkpoints() {
        let mut f = fixture(500);
        let manager = open(&mut f, MemoryBackend::new());
        let (peer, receiver) = PeerHandle::new(1);
        let now = f.index.best().time;

        // Without the key nothing is sent
        manager.block_processed(&mut f.index, &[&peer], now).unwrap();
        assert_eq!(manager.sync_checkpoint(), f.config.genesis_hash());

        manager
            .set_checkpoint_priv_key(&hex::encode(f.key.secret_bytes()))
            .unwrap();
        assert!(manager.has_master_key());
        manager.block_processed(&mut f.index, &[&peer], now).unwrap();

        assert_eq!(manager.sync_checkpoint(), at(&f.main, 300));
        let messages = drain(&receiver);
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            NetMessage::Checkpoint(c) if c.hash_checkpoint() == at(&f.main, 300)
        ));

        // Unchanged checkpoint is not sent again
        manager.block_processed(&mut f.index, &[&peer], now).unwrap();
        assert!(drain(&receiver).is_empty());
    }

    #[test]
    fn send_requires_master_key() {
        let mut f = fixture(10);
        let manager = open(&mut f, MemoryBackend::new());
        assert!(matches!(
            manager.send_sync_checkpoint(&mut f.index, &at(&f.main, 5), &[]),
            Err(CheckpointErr::NoMasterKey)
        ));
        assert!(manager.set_checkpoint_priv_key("zz").is_err());
        assert!(manager.set_checkpoint_priv_key(&hex::encode([0u8; 32])).is_err());
    }

    #[test]
    fn relay_skips_peers_that_know_the_checkpoint() {
        let f = fixture(10);
        let checkpoint = signed(&f.key, at(&f.main, 5));
        let mut verified = checkpoint.clone();
        verified.check_signature(f.config.master_pubkey()).unwrap();
        let (peer, receiver) = PeerHandle::new(1);

        assert!(verified.relay_to(&peer));
        assert!(!verified.relay_to(&peer));
        assert_eq!(drain(&receiver).len(), 1);
        assert_eq!(peer.checkpoint_known(), at(&f.main, 5));
    }

    #[test]
    fn checkpoint_maturity_and_age() {
        let mut f = fixture(200);
        let manager = open(&mut f, MemoryBackend::new());
        manager.write_sync_checkpoint(&at(&f.main, 100)).unwrap();
        let cp_time = f.index.get(&at(&f.main, 100)).unwrap().time;

        assert!(manager.is_mature_sync_checkpoint(&f.index, cp_time));
        manager.write_sync_checkpoint(&at(&f.main, 150)).unwrap();
        let cp_time = f.index.get(&at(&f.main, 150)).unwrap().time;
        assert!(!manager.is_mature_sync_checkpoint(&f.index, cp_time));
        assert!(manager.is_mature_sync_checkpoint(&f.index, cp_time + STAKE_MIN_AGE + 1));

        assert!(!manager.is_sync_checkpoint_too_old(&f.index, 60, cp_time + 60));
        assert!(manager.is_sync_checkpoint_too_old(&f.index, 60, cp_time + 61));
    }

    #[test]
    fn it_warns_about_old_checkpoints() {
        let mut f = fixture(200);
        let manager = open(&mut f, MemoryBackend::new());
        let tip_time = f.index.best().time;

        assert_eq!(manager.warnings(&f.index, tip_time), None);

        // Genesis is well past the threshold once the tip is recent
        let late = T0 + CHECKPOINT_TOO_OLD_SECS + 1;
        let mut index = f.index.clone();
        let tip = index.best().hash;
        index.insert(block_hash(3, 201), tip, late).unwrap();
        index.set_best_chain(&block_hash(3, 201)).unwrap();
        assert_eq!(
            manager.warnings(&index, late),
            Some(CHECKPOINT_TOO_OLD_WARNING)
        );
    }

    #[test]
    fn sync_checkpoint_wire_format() {
        let f = fixture(1);
        let checkpoint = signed(&f.key, at(&f.main, 1));
        assert_eq!(checkpoint.msg().len(), 36);
        assert!(checkpoint.is_null());

        let bytes = encode_wire(&checkpoint).unwrap();
        let mut decoded: SyncCheckpoint = decode_wire(&bytes).unwrap();
        assert_eq!(decoded, checkpoint);

        decoded.check_signature(f.config.master_pubkey()).unwrap();
        assert_eq!(decoded.hash_checkpoint(), at(&f.main, 1));
        assert_eq!(decoded.version(), SYNC_CHECKPOINT_VERSION);
        assert_ne!(decoded.hash(), Hash256::zero());
    }

    #[test]
    fn it_parses_policies() {
        assert_eq!("strict".parse::<CheckpointPolicy>(), Ok(CheckpointPolicy::Strict));
        assert_eq!("advisory".parse::<CheckpointPolicy>(), Ok(CheckpointPolicy::Advisory));
        assert_eq!("permissive".parse::<CheckpointPolicy>(), Ok(CheckpointPolicy::Permissive));
        assert!("lenient".parse::<CheckpointPolicy>().is_err());
    }
}
