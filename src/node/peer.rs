// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::SyncCheckpoint;
use crate::primitives::Hash256;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvKind {
    Block,
}

/// Inventory vector announcing or requesting an object by hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inventory {
    pub kind: InvKind,
    pub hash: Hash256,
}

impl Inventory {
    #[must_use]
    pub fn block(hash: Hash256) -> Self {
        Self {
            kind: InvKind::Block,
            hash,
        }
    }
}

/// Messages the checkpoint subsystem queues for a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetMessage {
    /// Signed synchronized checkpoint
    Checkpoint(SyncCheckpoint),

    /// Request for the blocks after `from`, up to and including `stop`
    GetBlocks { from: Hash256, stop: Hash256 },

    /// Request for specific objects
    GetData(Vec<Inventory>),
}

/// Connected peer as seen by the checkpoint subsystem. Every method only
/// queues work and never waits on the remote side.
pub trait Peer: Send + Sync {
    fn id(&self) -> u64;

    fn push_message(&self, msg: NetMessage);

    fn push_get_blocks(&self, from: &Hash256, stop: &Hash256) {
        self.push_message(NetMessage::GetBlocks {
            from: *from,
            stop: *stop,
        });
    }

    fn ask_for(&self, inv: Inventory) {
        self.push_message(NetMessage::GetData(vec![inv]));
    }

    /// Last synchronized checkpoint this peer has been sent
    fn checkpoint_known(&self) -> Hash256;

    fn set_checkpoint_known(&self, hash: Hash256);
}

/// Peer backed by an unbounded channel drained by the connection's writer
#[derive(Debug)]
pub struct PeerHandle {
    id: u64,
    sender: Sender<NetMessage>,
    checkpoint_known: Mutex<Hash256>,
}

impl PeerHandle {
    #[must_use]
    pub fn new(id: u64) -> (Self, Receiver<NetMessage>) {
        let (sender, receiver) = unbounded();

        (
            Self {
                id,
                sender,
                checkpoint_known: Mutex::new(Hash256::zero()),
            },
            receiver,
        )
    }
}

impl Peer for PeerHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn push_message(&self, msg: NetMessage) {
        if self.sender.send(msg).is_err() {
            debug!("Peer {} disconnected, dropping message", self.id);
        }
    }

    fn checkpoint_known(&self) -> Hash256 {
        *self.checkpoint_known.lock()
    }

    fn set_checkpoint_known(&self, hash: Hash256) {
        *self.checkpoint_known.lock() = hash;
    }
}
