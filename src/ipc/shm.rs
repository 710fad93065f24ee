//! System V shared memory. `shmget` reserves pages from the buddy
//! allocator up front; `shmat`/`shmdt` just map/unmap a VMA pointing at
//! them in the caller's address space. `shmctl(IPC_RMID)` marks the
//! segment for deletion but the backing frames are only freed once the
//! attach count drops to zero — a `shmdt` that observes `marked` and
//! `attach_count == 0` after decrementing is what actually frees them.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use x86_64::VirtAddr;

use crate::ipc::{self, IpcId, Key, Permissions};
use crate::kerror::KernelError;
use crate::memory::buddy::{self, AllocFlags, FRAME_SIZE};
use crate::memory::vma::{Backing, VmaFlags};
use crate::memory::Mm;
use crate::sync::spinlock::SpinLock;

struct Segment {
    frames: Arc<Vec<usize>>,
    perms: Permissions,
    attach_count: u32,
    marked_for_deletion: bool,
}

struct ShmTable {
    segments: BTreeMap<IpcId, Segment>,
}

static TABLE: SpinLock<ShmTable> = SpinLock::new(ShmTable { segments: BTreeMap::new() });

pub fn shmget(key: Key, size: usize, create: bool, excl: bool, perms: Permissions) -> Result<IpcId, KernelError> {
    if size == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let (id, created) = ipc::resolve(key, create, excl)?;
    if created {
        let page_count = (size + FRAME_SIZE - 1) / FRAME_SIZE;
        let mut frames = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            match buddy::BUDDY.lock().alloc(0, AllocFlags::default()) {
                Ok(pfn) => frames.push(pfn),
                Err(e) => {
                    for pfn in frames {
                        buddy::BUDDY.lock().free(pfn, 0);
                    }
                    return Err(e);
                }
            }
        }
        TABLE.lock().segments.insert(
            id,
            Segment { frames: Arc::new(frames), perms, attach_count: 0, marked_for_deletion: false },
        );
    }
    Ok(id)
}

/// Map `id`'s frames into `mm` at `va`, bumping the segment's attach count.
pub fn shmat(id: IpcId, mm: &mut Mm, va: VirtAddr, writable: bool) -> Result<(), KernelError> {
    let frames = {
        let mut table = TABLE.lock();
        let seg = table.segments.get_mut(&id).ok_or(KernelError::NotFound)?;
        seg.attach_count += 1;
        seg.frames.clone()
    };
    let mut flags = VmaFlags::READ | VmaFlags::USER | VmaFlags::SHARED;
    if writable {
        flags |= VmaFlags::WRITE;
    }
    if let Err(e) = mm.map_shared(va, frames, flags, Backing::SharedMemory { id: id.0 }) {
        if let Some(seg) = TABLE.lock().segments.get_mut(&id) {
            seg.attach_count -= 1;
        }
        return Err(e);
    }
    Ok(())
}

/// Unmap the VMA at `va` from `mm` and drop the segment's attach count.
/// Frees the backing frames if the segment was already marked for
/// deletion and this was the last attachment.
pub fn shmdt(id: IpcId, mm: &mut Mm, va: VirtAddr, size: u64) -> Result<(), KernelError> {
    mm.unmap(va, size)?;
    let mut table = TABLE.lock();
    if let Some(seg) = table.segments.get_mut(&id) {
        seg.attach_count = seg.attach_count.saturating_sub(1);
        if seg.marked_for_deletion && seg.attach_count == 0 {
            let seg = table.segments.remove(&id).unwrap();
            free_segment_frames(&seg.frames);
        }
    }
    Ok(())
}

fn free_segment_frames(frames: &Arc<Vec<usize>>) {
    if Arc::strong_count(frames) == 1 {
        for &pfn in frames.iter() {
            buddy::BUDDY.lock().free(pfn, 0);
        }
    }
}

/// Mark the segment for deletion. If nothing is attached, destroy it
/// immediately; otherwise the last `shmdt` finishes the job.
pub fn shmctl_rmid(id: IpcId, key: Key) -> Result<(), KernelError> {
    let mut table = TABLE.lock();
    let seg = table.segments.get_mut(&id).ok_or(KernelError::NotFound)?;
    seg.marked_for_deletion = true;
    if seg.attach_count == 0 {
        let seg = table.segments.remove(&id).unwrap();
        drop(table);
        free_segment_frames(&seg.frames);
    }
    ipc::unregister(key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms() -> Permissions {
        Permissions { uid: 0, gid: 0, mode: 0o600 }
    }

    #[test]
    fn shmget_rounds_size_up_to_whole_pages() {
        buddy::ensure_test_pool();
        let id = shmget(Key::IPC_PRIVATE, 1, true, false, perms()).unwrap();
        let frame_count = {
            let table = TABLE.lock();
            table.segments.get(&id).unwrap().frames.len()
        };
        assert_eq!(frame_count, 1);
        shmctl_rmid(id, Key::IPC_PRIVATE).unwrap();
    }

    #[test]
    fn rmid_with_no_attachments_frees_immediately() {
        buddy::ensure_test_pool();
        let id = shmget(Key::IPC_PRIVATE, FRAME_SIZE, true, false, perms()).unwrap();
        shmctl_rmid(id, Key::IPC_PRIVATE).unwrap();
        assert!(TABLE.lock().segments.get(&id).is_none());
    }
}
