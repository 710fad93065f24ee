//! Program image registry.
//!
//! `execve` needs somewhere to find a named binary's bytes; a real ext2
//! layout is explicitly out of scope for this crate. This is the "black
//! box" stand-in: a flat name → bytes table that `execve` and the init
//! bring-up path populate directly (from the boot image, from a prior
//! `write`), rather than walking a directory tree on disk.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::kerror::KernelError;
use crate::sync::spinlock::SpinLock;

struct ImageStore {
    images: BTreeMap<String, Vec<u8>>,
}

static STORE: SpinLock<ImageStore> = SpinLock::new(ImageStore { images: BTreeMap::new() });

/// Register (or replace) a named program image.
pub fn register(name: &str, data: Vec<u8>) {
    STORE.lock().images.insert(String::from(name), data);
}

pub fn lookup(name: &str) -> Result<Vec<u8>, KernelError> {
    STORE.lock().images.get(name).cloned().ok_or(KernelError::NotFound)
}

pub fn remove(name: &str) {
    STORE.lock().images.remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        register("hello", alloc::vec![1, 2, 3]);
        assert_eq!(lookup("hello").unwrap(), alloc::vec![1, 2, 3]);
        remove("hello");
    }

    #[test]
    fn lookup_of_unregistered_name_is_not_found() {
        assert!(matches!(lookup("does-not-exist"), Err(KernelError::NotFound)));
    }
}
