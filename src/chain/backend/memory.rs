// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{BackendErr, CheckpointBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use triomphe::Arc;

type Store = RwLock<HashMap<Vec<u8>, Vec<u8>>>;

/// In memory checkpoint store. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    committed: Arc<Store>,
    staged: Arc<Mutex<Option<Vec<(Vec<u8>, Vec<u8>)>>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointBackend for MemoryBackend {
    fn txn_begin(&self) -> Result<(), BackendErr> {
        let mut staged = self.staged.lock();

        if staged.is_some() {
            return Err(BackendErr::TransactionInProgress);
        }

        *staged = Some(vec![]);
        Ok(())
    }

    fn txn_commit(&self) -> Result<(), BackendErr> {
        let writes = self.staged.lock().take().ok_or(BackendErr::NoTransaction)?;
        let mut committed = self.committed.write();

        for (key, val) in writes {
            committed.insert(key, val);
        }

        Ok(())
    }

    fn txn_abort(&self) -> Result<(), BackendErr> {
        self.staged
            .lock()
            .take()
            .map(|_| ())
            .ok_or(BackendErr::NoTransaction)
    }

    fn write_key_val(&self, key: &[u8], val: Vec<u8>) -> Result<(), BackendErr> {
        self.staged
            .lock()
            .as_mut()
            .ok_or(BackendErr::NoTransaction)?
            .push((key.to_vec(), val));
        Ok(())
    }

    fn get_val(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendErr> {
        Ok(self.committed.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Hash256;

    #[test]
    fn it_commits_transactions() {
        let backend = MemoryBackend::new();
        let hash = Hash256::hash_from_slice(b"checkpoint");
        assert_eq!(backend.read_sync_checkpoint().unwrap(), None);

        backend.txn_begin().unwrap();
        backend.write_sync_checkpoint(&hash).unwrap();
        assert_eq!(backend.read_sync_checkpoint().unwrap(), None);
        backend.txn_commit().unwrap();

        assert_eq!(backend.read_sync_checkpoint().unwrap(), Some(hash));
        assert_eq!(backend.clone().read_sync_checkpoint().unwrap(), Some(hash));
    }

    #[test]
    fn it_aborts_transactions() {
        let backend = MemoryBackend::new();
        backend.txn_begin().unwrap();
        backend.write_checkpoint_pubkey("04ab").unwrap();
        backend.txn_abort().unwrap();

        assert_eq!(backend.read_checkpoint_pubkey().unwrap(), None);
        assert!(matches!(backend.txn_abort(), Err(BackendErr::NoTransaction)));
    }

    #[test]
    fn it_rejects_writes_outside_transactions() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.write_sync_checkpoint(&Hash256::zero()),
            Err(BackendErr::NoTransaction)
        ));

        backend.txn_begin().unwrap();
        assert!(matches!(
            backend.txn_begin(),
            Err(BackendErr::TransactionInProgress)
        ));
        assert!(matches!(backend.txn_commit(), Ok(())));
        assert!(matches!(backend.txn_commit(), Err(BackendErr::NoTransaction)));
    }
}
