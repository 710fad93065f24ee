//! Physical frame allocator: power-of-two order blocks, one free-list array
//! per zone. Replaces the teacher's `BumpFrameAllocator`, which never freed
//! anything — everything downstream (slab, `Mm`, IPC shared memory) needs
//! real free() to avoid exhausting physical memory after a handful of
//! fork/exit cycles.

use alloc::vec;
use alloc::vec::Vec;

use crate::kerror::KernelError;
use crate::sync::spinlock::SpinLock;

pub const FRAME_SIZE: usize = 4096;
pub const MAX_ORDER: usize = 10; // 2^10 frames = 4 MiB, largest single block

/// A contiguous physical frame range with uniform allocation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    /// Low 16 MiB — reserved for legacy DMA-capable devices (ATA PIO does
    /// not actually require this, but the zone exists so `AllocFlags::DMA`
    /// has somewhere real to land).
    Dma,
    Normal,
    /// Not populated on this 64-bit identity-mapped kernel; kept as a
    /// variant so the zone enum matches the spec's three-zone model rather
    /// than silently dropping the case.
    Highmem,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        const ZONE_DMA    = 0b0000_0001;
        const ZONE_NORMAL = 0b0000_0010;
        const ZONE_HIGH   = 0b0000_0100;
        const KERNEL      = 0b0001_0000;
        const USER        = 0b0010_0000;
        const CAN_SLEEP   = 0b0100_0000;
    }
}

impl Default for AllocFlags {
    fn default() -> Self {
        AllocFlags::ZONE_NORMAL | AllocFlags::KERNEL
    }
}

/// Per-frame bookkeeping. `order` is meaningful only while the frame is the
/// head of a free block; `refcount` is meaningful only while allocated.
#[derive(Debug, Clone, Copy)]
struct FrameInfo {
    order: i8, // -1 when not a free-list head
    refcount: u32,
    reserved: bool,
}

impl FrameInfo {
    const fn boot_reserved() -> Self {
        FrameInfo { order: -1, refcount: 0, reserved: true }
    }
}

/// One zone's buddy state: `MAX_ORDER + 1` free-lists of PFNs.
struct Zone {
    kind: ZoneKind,
    base_pfn: usize,
    frame_count: usize,
    free_lists: [Vec<usize>; MAX_ORDER + 1],
    free_frames: usize,
}

impl Zone {
    fn new(kind: ZoneKind, base_pfn: usize, frame_count: usize) -> Self {
        Zone {
            kind,
            base_pfn,
            frame_count,
            free_lists: Default::default(),
            free_frames: 0,
        }
    }

    fn contains(&self, pfn: usize) -> bool {
        pfn >= self.base_pfn && pfn < self.base_pfn + self.frame_count
    }
}

pub struct BuddyAllocator {
    zones: Vec<Zone>,
    frames: Vec<FrameInfo>,
    total_frames: usize,
}

impl BuddyAllocator {
    pub const fn empty() -> Self {
        BuddyAllocator { zones: Vec::new(), frames: Vec::new(), total_frames: 0 }
    }

    /// Build zones over `[start_pfn, end_pfn)`, reserving frames below
    /// `reserved_below_pfn` (kernel image, boot structures) as already
    /// allocated so they are never handed out.
    pub fn init(&mut self, start_pfn: usize, end_pfn: usize, reserved_below_pfn: usize) {
        self.total_frames = end_pfn;
        self.frames = vec![FrameInfo::boot_reserved(); end_pfn];

        const DMA_LIMIT_PFN: usize = (16 * 1024 * 1024) / FRAME_SIZE;
        let dma_end = DMA_LIMIT_PFN.min(end_pfn).max(start_pfn);

        if dma_end > start_pfn {
            self.zones.push(Zone::new(ZoneKind::Dma, start_pfn, dma_end - start_pfn));
        }
        if end_pfn > dma_end {
            self.zones.push(Zone::new(ZoneKind::Normal, dma_end, end_pfn - dma_end));
        }

        for pfn in start_pfn..end_pfn {
            if pfn < reserved_below_pfn {
                continue;
            }
            self.frames[pfn] = FrameInfo { order: -1, refcount: 0, reserved: false };
        }

        // Carve each zone's free range into maximal aligned blocks and push
        // them to their order's free-list — same split-down-on-demand logic
        // run in reverse at boot time.
        for zone in &mut self.zones {
            let mut pfn = zone.base_pfn.max(reserved_below_pfn);
            let zone_end = zone.base_pfn + zone.frame_count;
            while pfn < zone_end {
                let mut order = MAX_ORDER;
                loop {
                    let block_frames = 1usize << order;
                    let aligned = pfn % block_frames == 0;
                    let fits = pfn + block_frames <= zone_end;
                    if aligned && fits {
                        break;
                    }
                    if order == 0 {
                        break;
                    }
                    order -= 1;
                }
                let block_frames = 1usize << order;
                Self::mark_free_head(&mut self.frames, pfn, order as i8);
                zone.free_lists[order].push(pfn);
                zone.free_frames += block_frames;
                pfn += block_frames;
            }
        }
    }

    fn mark_free_head(frames: &mut [FrameInfo], pfn: usize, order: i8) {
        frames[pfn].order = order;
        frames[pfn].refcount = 0;
    }

    fn zone_index_for(&self, hint: AllocFlags) -> Option<usize> {
        let want = if hint.contains(AllocFlags::ZONE_DMA) {
            ZoneKind::Dma
        } else if hint.contains(AllocFlags::ZONE_HIGH) {
            ZoneKind::Highmem
        } else {
            ZoneKind::Normal
        };
        self.zones.iter().position(|z| z.kind == want)
    }

    /// Allocate a `2^order`-frame, order-aligned block. Tie-break: lowest
    /// PFN among equal-order candidates, so high memory stays free for large
    /// requests.
    pub fn alloc(&mut self, order: usize, flags: AllocFlags) -> Result<usize, KernelError> {
        if order > MAX_ORDER {
            return Err(KernelError::InvalidArgument);
        }
        let zi = self
            .zone_index_for(flags)
            .or_else(|| if !self.zones.is_empty() { Some(0) } else { None })
            .ok_or(KernelError::OutOfMemory)?;

        // Scan upward from the requested order for the first non-empty list.
        let mut found_order = None;
        for o in order..=MAX_ORDER {
            if !self.zones[zi].free_lists[o].is_empty() {
                found_order = Some(o);
                break;
            }
        }
        let found_order = found_order.ok_or(KernelError::OutOfMemory)?;

        // Pop the lowest-PFN block of that order (kept sorted on insert).
        let list = &mut self.zones[zi].free_lists[found_order];
        list.sort_unstable();
        let pfn = list.remove(0);
        self.zones[zi].free_frames -= 1usize << found_order;

        // Split down to the requested order, pushing the unused half of
        // each split to its own free-list.
        let mut cur_order = found_order;
        let mut cur_pfn = pfn;
        while cur_order > order {
            cur_order -= 1;
            let buddy_pfn = cur_pfn + (1usize << cur_order);
            Self::mark_free_head(&mut self.frames, buddy_pfn, cur_order as i8);
            self.zones[zi].free_lists[cur_order].push(buddy_pfn);
            self.zones[zi].free_frames += 1usize << cur_order;
        }

        self.frames[cur_pfn] = FrameInfo { order: -1, refcount: 1, reserved: false };
        Ok(cur_pfn)
    }

    /// Free a block previously returned by `alloc` at the same `order`,
    /// coalescing with its buddy while possible.
    ///
    /// Freeing a PFN that was not allocated at this order, or double-freeing,
    /// is a developer error per the spec's error taxonomy and panics rather
    /// than returning a `Result`.
    pub fn free(&mut self, pfn: usize, order: usize) {
        assert!(!self.frames[pfn].reserved, "buddy: freeing a reserved frame {}", pfn);
        assert!(self.frames[pfn].order == -1 && self.frames[pfn].refcount > 0,
            "buddy: double-free or bad order at pfn {}", pfn);

        let zi = self.zones.iter().position(|z| z.contains(pfn)).expect("buddy: pfn outside any zone");

        let mut cur_pfn = pfn;
        let mut cur_order = order;
        while cur_order < MAX_ORDER {
            let buddy_pfn = cur_pfn ^ (1usize << cur_order);
            if !self.zones[zi].contains(buddy_pfn) {
                break;
            }
            if self.frames[buddy_pfn].order != cur_order as i8 {
                break; // buddy not free at this order
            }
            // Buddy is free at the same order: remove it from its free-list
            // and coalesce upward.
            let list = &mut self.zones[zi].free_lists[cur_order];
            if let Some(pos) = list.iter().position(|&p| p == buddy_pfn) {
                list.remove(pos);
            } else {
                break;
            }
            self.zones[zi].free_frames -= 1usize << cur_order;
            cur_pfn = cur_pfn.min(buddy_pfn);
            cur_order += 1;
        }

        Self::mark_free_head(&mut self.frames, cur_pfn, cur_order as i8);
        self.zones[zi].free_lists[cur_order].push(cur_pfn);
        self.zones[zi].free_frames += 1usize << cur_order;
    }

    /// Sum over zones of free bytes, for the accounting invariant in §8.
    pub fn free_bytes(&self) -> usize {
        self.zones.iter().map(|z| z.free_frames * FRAME_SIZE).sum()
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}

pub static BUDDY: SpinLock<BuddyAllocator> = SpinLock::new(BuddyAllocator::empty());

/// Bring up the global allocator exactly once for whichever test happens to
/// run first — slab/kmalloc tests allocate real frames through `BUDDY`
/// rather than a private instance, since they exercise the cache-growth
/// path that production code also drives through the global.
#[cfg(test)]
pub fn ensure_test_pool() {
    static INIT: spin::Once<()> = spin::Once::new();
    INIT.call_once(|| {
        BUDDY.lock().init(0, 1 << 16, 0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(frames: usize) -> BuddyAllocator {
        let mut b = BuddyAllocator::empty();
        b.init(0, frames, 0);
        b
    }

    #[test]
    fn alloc_free_round_trip_preserves_total() {
        let mut b = fresh(1024);
        let before = b.free_bytes();
        let blocks: Vec<_> = (0..16).map(|_| b.alloc(2, AllocFlags::default()).unwrap()).collect();
        assert!(b.free_bytes() < before);
        for blk in blocks {
            b.free(blk, 2);
        }
        assert_eq!(b.free_bytes(), before);
    }

    #[test]
    fn coalesces_buddies_back_to_original_order() {
        let mut b = fresh(16);
        let a = b.alloc(0, AllocFlags::default()).unwrap();
        let c = b.alloc(0, AllocFlags::default()).unwrap();
        assert_eq!(a ^ 1, c); // buddies differ in the order-0 bit
        b.free(a, 0);
        b.free(c, 0);
        // The pair should have recombined into at least an order-1 block.
        let big = b.alloc(1, AllocFlags::default()).unwrap();
        assert!(big == a || big == c - 1 || big % 2 == 0);
    }

    #[test]
    fn oom_returns_recoverable_error() {
        let mut b = fresh(4);
        assert!(b.alloc(10, AllocFlags::default()).is_err());
    }
}
