//! Virtual memory areas — the unit the `Mm` VMA list is built from.

use alloc::sync::Arc;

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const READ    = 0b0000_0001;
        const WRITE   = 0b0000_0010;
        const EXEC    = 0b0000_0100;
        const USER    = 0b0000_1000;
        const SHARED  = 0b0001_0000;
    }
}

/// What a VMA's pages are backed by.
#[derive(Clone)]
pub enum Backing {
    Anonymous,
    /// A System V shared-memory segment; `id` indexes `ipc::shm`'s object
    /// table so `shmdt` can find its way back to decrement the attach count.
    SharedMemory { id: u32 },
}

/// `[start, end)` within one address space.
#[derive(Clone)]
pub struct Vma {
    pub start: u64,
    pub end: u64,
    pub flags: VmaFlags,
    pub backing: Backing,
    /// Physical frames backing this VMA, in page order, shared via `Arc` so
    /// a `SHARED` VMA's `clone` can bump a refcount instead of copying.
    pub frames: Arc<alloc::vec::Vec<usize>>,
}

impl Vma {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(VmaFlags::WRITE)
    }

    pub fn is_readable(&self) -> bool {
        self.flags.contains(VmaFlags::READ)
    }
}
