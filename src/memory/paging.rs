//! Low-level page-table plumbing shared by every `Mm`: translating between
//! physical frames and the kernel's identity-mapped view of them, reading
//! the currently active table, and handing the buddy allocator to the
//! x86_64 crate's `Mapper` machinery as a `FrameAllocator`.

use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{FrameAllocator, PageTable, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

use crate::memory::buddy::{self, AllocFlags, FRAME_SIZE};

/// The kernel identity-maps all physical memory at boot (per the teacher's
/// boot setup), so physical and kernel-virtual addresses coincide.
pub const PHYS_MEM_OFFSET: u64 = 0;

/// PML4 index at which the kernel half of every address space begins —
/// entries at or above this index are copied verbatim from the boot-time
/// table into every new `Mm` and never touched again.
pub const KERNEL_PML4_INDEX: usize = 256;

pub struct BuddyFrameAllocator;

unsafe impl FrameAllocator<Size4KiB> for BuddyFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        let pfn = buddy::BUDDY.lock().alloc(0, AllocFlags::default()).ok()?;
        Some(PhysFrame::containing_address(PhysAddr::new((pfn * FRAME_SIZE) as u64)))
    }
}

pub fn free_frame(frame: PhysFrame<Size4KiB>) {
    let pfn = (frame.start_address().as_u64() as usize) / FRAME_SIZE;
    buddy::BUDDY.lock().free(pfn, 0);
}

pub unsafe fn active_level_4_table() -> &'static mut PageTable {
    let (frame, _) = Cr3::read();
    let virt = VirtAddr::new(PHYS_MEM_OFFSET + frame.start_address().as_u64());
    &mut *virt.as_mut_ptr()
}

pub unsafe fn level_4_table_at(phys: PhysAddr) -> &'static mut PageTable {
    let virt = VirtAddr::new(PHYS_MEM_OFFSET + phys.as_u64());
    &mut *virt.as_mut_ptr()
}

/// Called once at boot, before any `Mm` exists, to sanity-check that the
/// bootloader handed us a usable level-4 table.
pub unsafe fn init_paging(physical_memory_offset: VirtAddr) {
    assert_eq!(physical_memory_offset.as_u64(), PHYS_MEM_OFFSET,
        "paging: bootloader physical memory offset does not match the kernel's identity-map assumption");
    let _ = active_level_4_table();
}
