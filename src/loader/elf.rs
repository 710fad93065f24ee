//! ELF64 loader. Parses `ET_EXEC` images from [`crate::fs::image`] and
//! materializes them as a fresh [`Mm`] — one VMA per `PT_LOAD` segment
//! plus a user stack — for [`crate::sched::exec`] to swap in.

use core::fmt;

use x86_64::VirtAddr;

use crate::memory::vma::VmaFlags;
use crate::memory::vmem;
use crate::memory::Mm;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const PF_W: u32 = 0x2;

struct Elf64Ehdr {
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

impl Elf64Ehdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 64 {
            return Err(ExecError::InvalidFormat);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ExecError::InvalidFormat);
        }
        if data[4] != ELFCLASS64 {
            return Err(ExecError::UnsupportedArch);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ExecError::UnsupportedArch);
        }

        let e_type = u16::from_le_bytes([data[16], data[17]]);
        let e_machine = u16::from_le_bytes([data[18], data[19]]);
        if e_type != ET_EXEC {
            return Err(ExecError::UnsupportedType);
        }
        if e_machine != EM_X86_64 {
            return Err(ExecError::UnsupportedArch);
        }

        Ok(Elf64Ehdr {
            e_entry: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            e_phoff: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            e_phentsize: u16::from_le_bytes([data[54], data[55]]),
            e_phnum: u16::from_le_bytes([data[56], data[57]]),
        })
    }
}

struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

impl Elf64Phdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 56 {
            return Err(ExecError::InvalidFormat);
        }
        Ok(Elf64Phdr {
            p_type: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            p_flags: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            p_offset: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            p_vaddr: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            p_filesz: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            p_memsz: u64::from_le_bytes(data[40..48].try_into().unwrap()),
        })
    }
}

#[derive(Debug)]
pub enum ExecError {
    FileNotFound,
    InvalidFormat,
    UnsupportedArch,
    UnsupportedType,
    MemoryError,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::FileNotFound => write!(f, "program image not found"),
            ExecError::InvalidFormat => write!(f, "invalid ELF format"),
            ExecError::UnsupportedArch => write!(f, "unsupported architecture"),
            ExecError::UnsupportedType => write!(f, "unsupported ELF type (need ET_EXEC)"),
            ExecError::MemoryError => write!(f, "memory allocation error"),
        }
    }
}

impl From<ExecError> for crate::kerror::KernelError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::FileNotFound => crate::kerror::KernelError::NotFound,
            ExecError::MemoryError => crate::kerror::KernelError::OutOfMemory,
            _ => crate::kerror::KernelError::InvalidArgument,
        }
    }
}

const USER_STACK_SIZE: u64 = 4096 * 4;
const USER_STACK_BASE: u64 = 0x0000_7000_0000_0000;

/// Info the kernel-mode trampoline needs to jump into ring 3; stashed by
/// `load` immediately before `sched::exec` swaps in the new `Mm`, and
/// consumed the first time the new context actually runs.
struct PendingUserTask {
    entry: u64,
    user_stack_top: u64,
}

static PENDING_USER_TASK: spin::Mutex<Option<PendingUserTask>> = spin::Mutex::new(None);

/// Parse `image_name`'s bytes and build a fresh address space for it.
/// Returns `(mm, trampoline_entry)` — the second value is what
/// [`crate::sched::exec`] should run; it is always
/// [`usermode_trampoline`] as a function pointer, the real user entry
/// point having been stashed for it to pick up.
pub fn load(image_name: &str) -> Result<(Mm, u64), ExecError> {
    let file_data = crate::fs::image::lookup(image_name).map_err(|_| ExecError::FileNotFound)?;
    let ehdr = Elf64Ehdr::parse(&file_data)?;

    let mut mm = Mm::new().map_err(|_| ExecError::MemoryError)?;

    for i in 0..ehdr.e_phnum as usize {
        let off = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        let phdr = Elf64Phdr::parse(&file_data[off..])?;
        if phdr.p_type != PT_LOAD {
            continue;
        }

        let page_aligned_start = phdr.p_vaddr & !0xFFF;
        let misalignment = phdr.p_vaddr - page_aligned_start;
        let size = (misalignment + phdr.p_memsz + 0xFFF) & !0xFFF;

        let mut flags = VmaFlags::READ | VmaFlags::USER;
        if phdr.p_flags & PF_W != 0 {
            flags |= VmaFlags::WRITE;
        }
        mm.map_anonymous(VirtAddr::new(page_aligned_start), size, flags)
            .map_err(|_| ExecError::MemoryError)?;

        copy_segment_into(&mm, page_aligned_start, misalignment, &file_data, &phdr)?;
    }

    mm.map_anonymous(
        VirtAddr::new(USER_STACK_BASE),
        USER_STACK_SIZE,
        VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER,
    )
    .map_err(|_| ExecError::MemoryError)?;

    *PENDING_USER_TASK.lock() = Some(PendingUserTask {
        entry: ehdr.e_entry,
        user_stack_top: USER_STACK_BASE + USER_STACK_SIZE,
    });

    crate::log_info!("exec: loaded '{}', entry={:#x}", image_name, ehdr.e_entry);

    Ok((mm, usermode_trampoline as *const () as u64))
}

/// Copy one `PT_LOAD` segment's file bytes (and zero its BSS tail) into
/// the frames `map_anonymous` just allocated, page by page, through the
/// identity-map indirection in [`crate::memory::vmem`] rather than the
/// user virtual address — this `Mm` isn't active yet.
fn copy_segment_into(
    mm: &Mm,
    page_aligned_start: u64,
    misalignment: u64,
    file_data: &[u8],
    phdr: &Elf64Phdr,
) -> Result<(), ExecError> {
    let frames = mm.vma_frames(VirtAddr::new(page_aligned_start)).ok_or(ExecError::MemoryError)?;
    let file_bytes = &file_data[phdr.p_offset as usize..(phdr.p_offset + phdr.p_filesz) as usize];
    let total = misalignment + phdr.p_memsz;

    for (page_idx, &pfn) in frames.iter().enumerate() {
        let page_start_in_seg = page_idx as u64 * 4096;
        if page_start_in_seg >= total {
            break;
        }
        unsafe {
            vmem::with_frame_mut(pfn, |frame| {
                for offset in 0..4096u64 {
                    let seg_off = page_start_in_seg + offset;
                    if seg_off < misalignment || seg_off >= total {
                        continue;
                    }
                    let file_off = seg_off - misalignment;
                    frame[offset as usize] =
                        if (file_off as usize) < file_bytes.len() { file_bytes[file_off as usize] } else { 0 };
                }
            });
        }
    }
    Ok(())
}

/// Runs once as the freshly-`exec`'d task's first kernel-mode code, then
/// drops to ring 3 at the real entry point recorded in [`load`].
pub fn usermode_trampoline() {
    let info = PENDING_USER_TASK.lock().take().expect("usermode_trampoline: no pending task info");

    let user_cs = crate::interrupts::gdt::user_code_selector().0;
    let user_ss = crate::interrupts::gdt::user_data_selector().0;

    crate::log_info!(
        "exec: entering ring 3 at {:#x}, stack {:#x}",
        info.entry,
        info.user_stack_top
    );

    crate::interrupts::usermode::jump_to_usermode(info.entry, info.user_stack_top, user_cs, user_ss);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_magic() {
        assert!(matches!(Elf64Ehdr::parse(&[0u8; 64]), Err(ExecError::InvalidFormat)));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(Elf64Ehdr::parse(&[0x7F, b'E', b'L', b'F']), Err(ExecError::InvalidFormat)));
    }

    #[test]
    fn load_of_unregistered_image_is_file_not_found() {
        assert!(matches!(load("no-such-program"), Err(ExecError::FileNotFound)));
    }
}
