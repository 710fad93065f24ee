//! `#[global_allocator]` wiring: every `Box`/`Vec`/`String` allocation in
//! the kernel ultimately lands here, which routes small requests to
//! `slab::KMALLOC` and large ones straight to the buddy allocator.

use core::alloc::{GlobalAlloc, Layout};

use crate::memory::buddy::{self, AllocFlags, FRAME_SIZE};
use crate::memory::slab;

/// Requests at or above this size skip the size-class ladder and go
/// straight to the buddy allocator as whole pages — the largest kmalloc
/// class is 2048 bytes, so anything bigger would waste most of a
/// multi-object slab anyway.
const LARGE_ALLOC_THRESHOLD: usize = 2048;

pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        if layout.size() > LARGE_ALLOC_THRESHOLD || layout.align() > 8 {
            return alloc_large(layout);
        }
        match slab::KMALLOC.lock().as_mut() {
            Some(km) => km.alloc(layout.size()).unwrap_or(core::ptr::null_mut()),
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        if layout.size() > LARGE_ALLOC_THRESHOLD || layout.align() > 8 {
            return dealloc_large(ptr, layout);
        }
        if let Some(km) = slab::KMALLOC.lock().as_mut() {
            km.free(ptr);
        }
    }
}

/// Large allocations are served as a run of whole pages from the buddy
/// allocator; the order actually used is recovered from the size on free by
/// recomputing it the same way `alloc_large` did, so no separate header is
/// needed (unlike the slab path, which must disambiguate which size class
/// it came from).
unsafe fn alloc_large(layout: Layout) -> *mut u8 {
    let pages = (layout.size() + FRAME_SIZE - 1) / FRAME_SIZE;
    let order = order_for_pages(pages);
    match buddy::BUDDY.lock().alloc(order, AllocFlags::default()) {
        Ok(pfn) => crate::memory::vmem::frame_to_virt(pfn) as *mut u8,
        Err(_) => core::ptr::null_mut(),
    }
}

unsafe fn dealloc_large(ptr: *mut u8, layout: Layout) {
    let pages = (layout.size() + FRAME_SIZE - 1) / FRAME_SIZE;
    let order = order_for_pages(pages);
    let pfn = (ptr as usize) / FRAME_SIZE;
    buddy::BUDDY.lock().free(pfn, order);
}

fn order_for_pages(pages: usize) -> usize {
    let mut order = 0;
    while (1usize << order) < pages {
        order += 1;
    }
    order
}

// Host test builds run inside `std` with its own allocator already backing
// every `Vec`/`Box` in the test harness itself (including ones touched
// before `init_heap` ever runs) — registering `KernelAllocator` there would
// hijack allocation crate-wide before `slab::KMALLOC` exists. Only the
// real no_std kernel binary installs it.
#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

/// Bring up the allocators backing `ALLOCATOR`: the buddy allocator over
/// the usable physical range, then the kmalloc size-class caches on top of
/// it. Must run before any `alloc`-crate type is touched.
pub fn init_heap(start_pfn: usize, end_pfn: usize, reserved_below_pfn: usize) {
    buddy::BUDDY.lock().init(start_pfn, end_pfn, reserved_below_pfn);
    slab::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_for_pages_rounds_up_to_power_of_two() {
        assert_eq!(order_for_pages(1), 0);
        assert_eq!(order_for_pages(2), 1);
        assert_eq!(order_for_pages(3), 2);
        assert_eq!(order_for_pages(4), 2);
        assert_eq!(order_for_pages(5), 3);
    }
}
