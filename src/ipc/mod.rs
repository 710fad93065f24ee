//! System V IPC: semaphore sets, message queues, and shared-memory
//! segments, sharing one key→id namespace. Grounded on the same
//! slab/bitmap-table shape the rest of the kernel uses for small identifier
//! spaces ([`crate::task::pid`]), generalized to hand out one id per family
//! rather than a single flat space, since `semget`/`msgget`/`shmget` each
//! have their own numbering in the real syscall ABI.

pub mod msg;
pub mod sem;
pub mod shm;

use alloc::collections::BTreeMap;

use crate::kerror::KernelError;
use crate::sync::spinlock::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub u32);

impl Key {
    /// Bypasses the key map; `get(IPC_PRIVATE, ...)` always allocates a
    /// fresh object no other caller can find by key.
    pub const IPC_PRIVATE: Key = Key(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpcId(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct Permissions {
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
}

/// `(inode & 0xffff) | ((device & 0xff) << 16) | ((proj_id & 0xff) << 24)`.
/// `inode`/`device` stand in for what a real filesystem would resolve
/// `path` to; this kernel's callers pass the file's already-resolved
/// identity rather than a path string, since there is no ext2 layer to
/// stat through.
pub fn ftok(inode: u32, device: u8, proj_id: u8) -> Key {
    Key((inode & 0xffff) | ((device as u32) << 16) | ((proj_id as u32) << 24))
}

/// Flag passed to `semget`/`msgget`/`shmget`: fail with `EEXIST` instead of
/// returning an existing object's id if one is already registered for the
/// key and this flag is combined with `IPC_CREAT`.
pub const IPC_CREAT: u32 = 0o1000;
pub const IPC_EXCL: u32 = 0o2000;
/// Passed to the blocking operations (`semop`, `msgsnd`, `msgrcv`) to
/// request `EAGAIN` instead of sleeping.
pub const IPC_NOWAIT: u32 = 0o4000;
/// Passed to `semctl`/`shmctl`/`msgctl` to mark an object for removal.
pub const IPC_RMID: i32 = 0;

struct Keyspace {
    by_key: BTreeMap<Key, IpcId>,
    next_id: u32,
}

static KEYSPACE: SpinLock<Keyspace> = SpinLock::new(Keyspace { by_key: BTreeMap::new(), next_id: 1 });

/// Look up `key` in the shared namespace, or allocate a fresh id and
/// register it if `create` is true and nothing is registered yet.
/// `IPC_PRIVATE` always takes the "allocate fresh, don't register" path.
pub fn resolve(key: Key, create: bool, excl: bool) -> Result<(IpcId, bool), KernelError> {
    let mut ks = KEYSPACE.lock();
    if key != Key::IPC_PRIVATE {
        if let Some(&id) = ks.by_key.get(&key) {
            if create && excl {
                return Err(KernelError::AlreadyExists);
            }
            return Ok((id, false));
        }
    }
    if !create {
        return Err(KernelError::NotFound);
    }
    let id = IpcId(ks.next_id);
    ks.next_id += 1;
    if key != Key::IPC_PRIVATE {
        ks.by_key.insert(key, id);
    }
    Ok((id, true))
}

/// Remove `key`'s mapping (called once the backing object is actually torn
/// down, not at `IPC_RMID` time — matching `shmctl`'s "marks for deletion,
/// defers destruction" contract).
pub fn unregister(key: Key) {
    if key != Key::IPC_PRIVATE {
        KEYSPACE.lock().by_key.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftok_packs_inode_device_and_project_id() {
        let k = ftok(0x1234, 0xab, 0x7);
        assert_eq!(k.0, 0x1234 | (0xab << 16) | (0x7 << 24));
    }

    #[test]
    fn excl_create_on_existing_key_fails() {
        let key = Key(0xdead_1111);
        let (first, created_first) = resolve(key, true, false).unwrap();
        assert!(created_first);
        assert!(resolve(key, true, true).is_err());
        let (second, created_second) = resolve(key, true, false).unwrap();
        assert_eq!(first, second);
        assert!(!created_second);
        unregister(key);
    }

    #[test]
    fn private_key_never_collides_in_the_map() {
        let (a, _) = resolve(Key::IPC_PRIVATE, true, false).unwrap();
        let (b, _) = resolve(Key::IPC_PRIVATE, true, false).unwrap();
        assert_ne!(a, b);
    }
}
