pub mod allocator;
pub mod buddy;
pub mod mm;
pub mod paging;
pub mod slab;
pub mod vma;
pub mod vmem;

pub use mm::Mm;

use crate::memory::buddy::FRAME_SIZE;

/// Drive the whole physical-memory bring-up sequence: read the Multiboot2
/// memory map, hand the usable range to the buddy allocator, point paging
/// at the boot-time table, then stand up the kmalloc caches the
/// `#[global_allocator]` needs before `alloc`-crate types can be used.
pub fn init(multiboot_info_addr: usize) {
    let boot_info = unsafe {
        multiboot2::BootInformation::load(multiboot_info_addr as *const _)
            .expect("Failed to load Multiboot2 info!")
    };
    let memory_map_tag = boot_info.memory_map_tag().expect("Memory map tag required");

    let areas = memory_map_tag.memory_areas();
    // Reconstruct a static slice from the raw pointer since multiboot2 tag
    // memory is static anyway — the struct's own lifetime is tied to the
    // pointer we were handed, which outlives the kernel.
    let static_areas: &'static [multiboot2::MemoryArea] =
        unsafe { core::slice::from_raw_parts(areas.as_ptr(), areas.len()) };

    let highest_addr = static_areas
        .iter()
        .map(|a| a.end_address())
        .max()
        .expect("memory map reported no areas");
    let end_pfn = (highest_addr as usize) / FRAME_SIZE;

    // Everything below the end of this kernel image plus the Multiboot2
    // info structure itself is off-limits; 4 MiB is a generous bound for a
    // teaching kernel's own footprint.
    let reserved_below_pfn = (4 * 1024 * 1024) / FRAME_SIZE;

    allocator::init_heap(0, end_pfn, reserved_below_pfn);
    crate::log_info!(
        "Buddy allocator initialized over {} frames ({} MiB), {} MiB free.",
        end_pfn,
        (end_pfn * FRAME_SIZE) / (1024 * 1024),
        buddy::BUDDY.lock().free_bytes() / (1024 * 1024),
    );

    use x86_64::VirtAddr;
    unsafe { paging::init_paging(VirtAddr::new(0)) };
    crate::log_info!("Virtual memory paging subsystem initialized.");

    use alloc::vec::Vec;
    let mut dynam_vec: Vec<u32> = Vec::new();
    for i in 0..500 {
        dynam_vec.push(i);
    }
    crate::log_info!("Heap smoke test: allocated a {}-element vector at {:p}.", dynam_vec.len(), dynam_vec.as_slice());
}
