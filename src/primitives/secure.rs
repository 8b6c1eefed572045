// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use lazy_static::lazy_static;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroize;

lazy_static! {
    /// Number of live secrets on each locked page, keyed by page base address
    static ref LOCKED_PAGES: Mutex<HashMap<usize, usize>> = Mutex::new(HashMap::new());
}

/// Fixed size secret buffer kept in page-locked memory for its whole
/// lifetime. The contents are zeroed before the pages are released.
pub struct SecureBytes<const N: usize> {
    inner: Box<[u8; N]>,
    locked: bool,
}

impl<const N: usize> SecureBytes<N> {
    #[must_use]
    pub fn new() -> Self {
        let inner = Box::new([0; N]);
        let locked = lock_region(inner.as_ptr() as usize, N);

        if !locked {
            debug!("Could not lock {} bytes of secret memory", N);
        }

        Self { inner, locked }
    }

    #[must_use]
    pub fn from_array(bytes: &[u8; N]) -> Self {
        let mut out = Self::new();
        out.inner.copy_from_slice(bytes);
        out
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.inner
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; N] {
        &mut self.inner
    }
}

impl<const N: usize> Default for SecureBytes<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Clone for SecureBytes<N> {
    fn clone(&self) -> Self {
        Self::from_array(&self.inner)
    }
}

impl<const N: usize> Zeroize for SecureBytes<N> {
    fn zeroize(&mut self) {
        self.inner.zeroize();
    }
}

impl<const N: usize> Drop for SecureBytes<N> {
    fn drop(&mut self) {
        self.inner.zeroize();

        if self.locked {
            unlock_region(self.inner.as_ptr() as usize, N);
        }
    }
}

impl<const N: usize> fmt::Debug for SecureBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureBytes(..)")
    }
}

/// Base addresses of the pages covering `[addr, addr + len)`
fn pages(addr: usize, len: usize) -> impl Iterator<Item = usize> {
    let size = page_size();
    let first = addr & !(size - 1);
    let last = (addr + len.max(1) - 1) & !(size - 1);
    (first..=last).step_by(size)
}

/// Registers a user on every page of the region. A page is locked by its
/// first user. On failure nothing stays registered.
fn lock_region(addr: usize, len: usize) -> bool {
    let mut locked_pages = LOCKED_PAGES.lock();
    let mut registered = vec![];

    for page in pages(addr, len) {
        let count = locked_pages.get(&page).copied().unwrap_or(0);

        if count == 0 && !lock_page(page) {
            for page in registered {
                release_page(&mut locked_pages, page);
            }

            return false;
        }

        locked_pages.insert(page, count + 1);
        registered.push(page);
    }

    true
}

/// Removes a user from every page of the region. A page is unlocked when its
/// last user leaves.
fn unlock_region(addr: usize, len: usize) {
    let mut locked_pages = LOCKED_PAGES.lock();

    for page in pages(addr, len) {
        release_page(&mut locked_pages, page);
    }
}

fn release_page(locked_pages: &mut HashMap<usize, usize>, page: usize) {
    let Some(count) = locked_pages.get_mut(&page) else {
        return;
    };

    *count -= 1;

    if *count == 0 {
        locked_pages.remove(&page);
        unlock_page(page);
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[cfg(unix)]
fn lock_page(page: usize) -> bool {
    // SAFETY: mlock only changes residency of the mapping containing `page`
    unsafe { libc::mlock(page as *const libc::c_void, page_size()) == 0 }
}

#[cfg(unix)]
fn unlock_page(page: usize) {
    // SAFETY: the page was locked by `lock_page` and has no remaining secrets
    unsafe {
        libc::munlock(page as *const libc::c_void, page_size());
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

#[cfg(not(unix))]
fn lock_page(_page: usize) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_page(_page: usize) {}

#[cfg(test)]
fn page_users(addr: usize) -> usize {
    let page = addr & !(page_size() - 1);
    LOCKED_PAGES.lock().get(&page).copied().unwrap_or(0)
}
