// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # Stakecoin
//! Core consensus guard of a proof-of-stake cryptocurrency node.
//!
//! ## Features
//! * **Synchronized checkpoints**: a block hash signed by the network master key
//!   is broadcast to every node, which then refuses blocks that do not descend
//!   from it. Checkpoints are validated against the block index, persisted
//!   transactionally and relayed to peers.
//! * **Hardened checkpoints**: hardcoded `(height, hash)` pairs per network.
//! * **Big integers**: arbitrary precision signed integers with MPI, compact
//!   and little-endian byte encodings.
//! * **secp256k1 keys**: DER and compact signatures with low-S normalization,
//!   public key recovery and BIP32 extended keys.

pub mod chain;
pub mod codec;
pub mod consensus;
pub mod node;
pub mod primitives;
pub mod settings;
