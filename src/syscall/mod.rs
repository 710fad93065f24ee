//! Central system-call dispatcher — the `int 0x80` handler's only callee.
//!
//! Generalizes the teacher's three-argument `dispatch(number, arg0, arg1,
//! arg2)` to five (`arg0..arg4`), and widens the syscall table from the
//! teacher's dozen entries to the full Linux-like i386 surface. Every
//! return value is a `u64` holding either a non-negative result or a
//! negated errno, the same convention [`crate::kerror::KernelError`]'s
//! `Into<i64>` produces — this file is the one place that conversion is
//! applied.

use crate::interrupts::usermode::TrapFrame;
use crate::ipc::{self, Key, Permissions};
use crate::kerror::KernelError;
use crate::sched::{self, SCHEDULER};
use crate::signal::{SaFlags, SigAction, SigHandler, SigSet, SavedSignalFrame};
use crate::task::process::ProcessId;

pub const SYS_EXIT: u64 = 1;
pub const SYS_FORK: u64 = 2;
pub const SYS_READ: u64 = 3;
pub const SYS_WRITE: u64 = 4;
pub const SYS_OPEN: u64 = 5;
pub const SYS_CLOSE: u64 = 6;
pub const SYS_WAITPID: u64 = 7;
pub const SYS_EXECVE: u64 = 11;
pub const SYS_CHDIR: u64 = 12;
pub const SYS_TIME: u64 = 13;
pub const SYS_MKNOD: u64 = 14;
pub const SYS_CHMOD: u64 = 15;
pub const SYS_LSEEK: u64 = 19;
pub const SYS_GETPID: u64 = 20;
pub const SYS_MOUNT: u64 = 21;
pub const SYS_GETUID: u64 = 24;
pub const SYS_NICE: u64 = 34;
pub const SYS_KILL: u64 = 37;
pub const SYS_MKDIR: u64 = 39;
pub const SYS_RMDIR: u64 = 40;
pub const SYS_DUP: u64 = 41;
pub const SYS_PIPE: u64 = 42;
pub const SYS_BRK: u64 = 45;
pub const SYS_SIGNAL: u64 = 48;
pub const SYS_GETEUID: u64 = 49;
pub const SYS_GETEGID: u64 = 50;
pub const SYS_IOCTL: u64 = 54;
pub const SYS_SYMLINK: u64 = 83;
pub const SYS_READLINK: u64 = 85;
pub const SYS_MMAP: u64 = 90;
pub const SYS_MUNMAP: u64 = 91;
pub const SYS_FCNTL: u64 = 55;
pub const SYS_SETPGID: u64 = 57;
pub const SYS_UNAME: u64 = 122;
pub const SYS_RENAME: u64 = 38;
pub const SYS_UNLINK: u64 = 10;
pub const SYS_DUP2: u64 = 63;
pub const SYS_GETPPID: u64 = 64;
pub const SYS_SETSID: u64 = 66;
pub const SYS_SIGACTION: u64 = 67;
pub const SYS_SIGSUSPEND: u64 = 72;
pub const SYS_SIGPROCMASK: u64 = 126;
pub const SYS_GETGID: u64 = 47;
pub const SYS_SETUID: u64 = 23;
pub const SYS_SETGID: u64 = 46;
pub const SYS_SETREUID: u64 = 70;
pub const SYS_SETREGID: u64 = 71;
pub const SYS_STAT: u64 = 106;
pub const SYS_FSTAT: u64 = 108;
pub const SYS_LSTAT: u64 = 107;
pub const SYS_SIGRETURN: u64 = 119;
pub const SYS_GETPGID: u64 = 132;
pub const SYS_GETSID: u64 = 147;
pub const SYS_NANOSLEEP: u64 = 162;
pub const SYS_SCHED_SETPARAM: u64 = 154;
pub const SYS_SCHED_GETPARAM: u64 = 155;
pub const SYS_WAITPERIOD: u64 = 250;
pub const SYS_ALARM: u64 = 27;
pub const SYS_MSGGET: u64 = 399;
pub const SYS_MSGSND: u64 = 400;
pub const SYS_MSGRCV: u64 = 401;
pub const SYS_MSGCTL: u64 = 402;
pub const SYS_SEMGET: u64 = 403;
pub const SYS_SEMOP: u64 = 404;
pub const SYS_SEMCTL: u64 = 405;
pub const SYS_SHMGET: u64 = 406;
pub const SYS_SHMAT: u64 = 407;
pub const SYS_SHMDT: u64 = 408;
pub const SYS_SHMCTL: u64 = 409;

const MAX_RW_LEN: usize = 1024 * 1024;
const FD_TABLE_SIZE: usize = crate::task::process::FD_TABLE_SIZE;

fn err(e: KernelError) -> u64 {
    let code: i64 = e.into();
    code as u64
}

fn validate_user_buf(ptr: u64, len: u64, need_write: bool) -> Result<(), KernelError> {
    let sched = SCHEDULER.lock();
    let cur = sched.current.as_ref().expect("syscall: dispatch with no active task");
    match cur.mm.as_ref() {
        // Kernel-only tasks (no private address space yet) trust the raw
        // pointer, matching the teacher's pre-EFAULT-checking behavior for
        // its bootstrap/kernel-thread callers.
        None => Ok(()),
        Some(mm) => mm.validate_user_range(ptr, len, need_write),
    }
}

/// Central syscall dispatcher — called from the `int 0x80` handler.
/// Arguments come from registers: rax=number, rdi=arg0 .. r8=arg4; the
/// interrupted task's saved RIP/CS/RFLAGS/RSP/SS come in via `trap_frame`,
/// the 7th (stack) argument the handler's asm pushes.
pub extern "C" fn dispatch(number: u64, arg0: u64, arg1: u64, arg2: u64, arg3: u64, arg4: u64, trap_frame: *mut TrapFrame) -> u64 {
    x86_64::instructions::interrupts::enable();
    let result = dispatch_inner(number, arg0, arg1, arg2, arg3, arg4, trap_frame);
    deliver_pending_signal(trap_frame);
    result
}

/// Signals a terminal action by default: anything not in this list is
/// either ignored by default (`SIGCHLD`) or has no default action this
/// kernel models.
fn is_default_terminate(sig: u32) -> bool {
    use crate::signal::*;
    matches!(sig, SIGHUP | SIGINT | SIGQUIT | SIGILL | SIGABRT | SIGFPE | SIGKILL | SIGSEGV | SIGPIPE | SIGALRM | SIGTERM | SIGUSR1 | SIGUSR2)
}

/// The signal-delivery-on-return step: runs once per syscall return, never
/// scattered across individual syscall bodies. `SigHandler::Default` either
/// terminates the task (per [`is_default_terminate`]) or is a no-op;
/// `SigHandler::Ignore` drops the signal; `SigHandler::User` rewrites the
/// trap frame so `iretq` resumes execution at the handler instead of where
/// the syscall was made, with a return address pointing at the sigreturn
/// trampoline page pushed onto the handler's stack.
fn deliver_pending_signal(trap_frame: *mut TrapFrame) {
    let mut sched = SCHEDULER.lock();
    let cur = match sched.current.as_mut() {
        Some(c) => c,
        None => return,
    };
    let original_blocked = cur.signals.blocked;
    let Some((sig, action)) = cur.signals.take_deliverable() else { return };

    match action.handler {
        SigHandler::Ignore => {}
        SigHandler::Default => {
            drop(sched);
            if is_default_terminate(sig) {
                sched::exit_current(128 + sig as i32, Some(sig));
            }
        }
        SigHandler::User(addr) => {
            if trap_frame.is_null() {
                return;
            }
            let mm = match cur.mm.as_ref() {
                Some(mm) => mm,
                None => return,
            };
            let frame = unsafe { &mut *trap_frame };
            let new_rsp = (frame.rsp & !0xF).wrapping_sub(8);
            if mm.validate_user_range(new_rsp, 8, true).is_err() {
                drop(sched);
                sched::exit_current(128 + sig as i32, Some(sig));
            }
            unsafe {
                core::ptr::write(new_rsp as *mut u64, crate::memory::mm::SIGRETURN_TRAMPOLINE_VA);
            }
            cur.saved_signal = Some(SavedSignalFrame {
                rip: frame.rip,
                rsp: frame.rsp,
                rflags: frame.rflags,
                blocked: original_blocked,
            });
            frame.rip = addr as u64;
            frame.rsp = new_rsp;
        }
    }
}

/// `sigreturn`: restore the execution state `deliver_pending_signal` stashed
/// before diverting into a `SigHandler::User` handler.
fn sys_sigreturn(trap_frame: *mut TrapFrame) -> u64 {
    if trap_frame.is_null() {
        return err(KernelError::InvalidArgument);
    }
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    let saved = match cur.saved_signal.take() {
        Some(s) => s,
        None => return err(KernelError::InvalidArgument),
    };
    cur.signals.blocked = saved.blocked;
    let frame = unsafe { &mut *trap_frame };
    frame.rip = saved.rip;
    frame.rsp = saved.rsp;
    frame.rflags = saved.rflags;
    0
}

fn dispatch_inner(number: u64, arg0: u64, arg1: u64, arg2: u64, arg3: u64, arg4: u64, trap_frame: *mut TrapFrame) -> u64 {
    match number {
        SYS_EXIT => {
            sched::exit_current(arg0 as i32, None);
        }
        SYS_FORK => match sched::fork() {
            Ok(pid) => pid.0,
            Err(e) => err(e),
        },
        SYS_READ => sys_read(arg0 as usize, arg1, arg2 as usize),
        SYS_WRITE => sys_write(arg0 as usize, arg1, arg2 as usize),
        SYS_OPEN => sys_open(arg0, arg1 as usize),
        SYS_CLOSE => sys_close(arg0 as usize),
        SYS_WAITPID => sys_waitpid(arg0, arg1),
        SYS_DUP => sys_dup(arg0 as usize),
        SYS_DUP2 => sys_dup2(arg0 as usize, arg1 as usize),
        SYS_PIPE => sys_pipe(arg0),
        SYS_GETPID => sched::current_pid().0,
        SYS_GETPPID => SCHEDULER.lock().current.as_ref().and_then(|c| c.ppid).map_or(0, |p| p.0),
        // This kernel tracks one (uid, gid) pair per task rather than
        // separate real/effective/saved sets, so the euid/egid variants
        // just read back the same fields.
        SYS_GETUID | SYS_GETEUID => SCHEDULER.lock().current.as_ref().map_or(0, |c| c.uid as u64),
        SYS_GETGID | SYS_GETEGID => SCHEDULER.lock().current.as_ref().map_or(0, |c| c.gid as u64),
        SYS_SETUID => sys_setuid(arg0 as u32),
        SYS_SETGID => sys_setgid(arg0 as u32),
        SYS_SETREUID => sys_setuid(arg1 as u32),
        SYS_SETREGID => sys_setgid(arg1 as u32),
        SYS_SETSID => match sched::setsid() {
            Ok(pid) => pid.0,
            Err(e) => err(e),
        },
        SYS_SETPGID => match sched::setpgid(ProcessId(arg0), ProcessId(arg1)) {
            Ok(()) => 0,
            Err(e) => err(e),
        },
        SYS_GETPGID => SCHEDULER.lock().current.as_ref().map_or(0, |c| c.pgid.0),
        SYS_GETSID => match sched::getsid(sched::current_pid(), ProcessId(arg0)) {
            Ok(sid) => sid.0,
            Err(e) => err(e),
        },
        SYS_KILL => sys_kill(arg0, arg1 as u32),
        SYS_SIGACTION => sys_sigaction(arg0 as u32, arg1, arg2),
        SYS_SIGPROCMASK => sys_sigprocmask(arg0 as u32, arg1),
        SYS_SIGRETURN => sys_sigreturn(trap_frame),
        SYS_SCHED_SETPARAM => sys_sched_setparam(arg0, arg1 as u8, arg2, arg3),
        SYS_SCHED_GETPARAM => 0,
        SYS_WAITPERIOD => sys_waitperiod(arg0, arg1, arg2),
        SYS_BRK => sys_brk(arg0),
        SYS_SEMGET => sys_semget(arg0, arg1 as usize, arg2 as u32),
        SYS_SEMOP => sys_semop(arg0, arg1, arg2 as usize),
        SYS_SEMCTL => sys_semctl(arg0, arg1 as i32),
        SYS_MSGGET => sys_msgget(arg0, arg1 as u32),
        SYS_MSGSND => sys_msgsnd(arg0, arg1 as i64, arg2, arg3 as usize, arg4 != 0),
        SYS_MSGRCV => sys_msgrcv(arg0, arg1 as i64, arg2 != 0),
        SYS_MSGCTL => sys_msgctl(arg0, arg1 as i32),
        SYS_SHMGET => sys_shmget(arg0, arg1 as usize, arg2 as u32),
        SYS_SHMAT => sys_shmat(arg0, arg1, arg2 != 0),
        SYS_SHMDT => sys_shmdt(arg0, arg1, arg2),
        SYS_SHMCTL => sys_shmctl(arg0, arg1 as i32),
        SYS_UNAME => sys_uname(arg0),
        SYS_NANOSLEEP => {
            sched::yield_now();
            0
        }
        SYS_EXECVE => sys_execve(arg0, arg1 as usize),
        SYS_MOUNT | SYS_IOCTL | SYS_MMAP => err(KernelError::Unsupported),
        _ => {
            crate::log_warn!("syscall: unimplemented or unknown number {}", number);
            err(KernelError::InvalidArgument)
        }
    }
}

fn current_fd_arc(fd: usize) -> Result<alloc::sync::Arc<spin::Mutex<crate::fs::fd::File>>, KernelError> {
    if fd >= FD_TABLE_SIZE {
        return Err(KernelError::InvalidArgument);
    }
    let sched = SCHEDULER.lock();
    let cur = sched.current.as_ref().expect("syscall: no active task");
    cur.fd_table[fd].clone().ok_or(KernelError::NotFound)
}

fn sys_read(fd: usize, ptr: u64, len: usize) -> u64 {
    if len == 0 || len > MAX_RW_LEN {
        return err(KernelError::InvalidArgument);
    }
    if let Err(e) = validate_user_buf(ptr, len as u64, true) {
        return err(e);
    }
    let file_arc = match current_fd_arc(fd) {
        Ok(f) => f,
        Err(e) => return err(e),
    };
    let slice = unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) };

    use crate::fs::fd::FileType;
    loop {
        let mut file = file_arc.lock();
        if !file.readable {
            return err(KernelError::PermissionDenied);
        }
        match &mut file.file_type {
            FileType::Console => {
                slice[0] = b'\n';
                return 1;
            }
            FileType::Regular => return 0,
            FileType::PipeRead(pipe) => {
                let mut inner = pipe.lock();
                if !inner.is_empty() {
                    return inner.read(slice) as u64;
                }
                if inner.active_writers() == 0 {
                    return 0;
                }
                drop(inner);
                let waiters_ptr = pipe.clone();
                drop(file);
                if !waiters_ptr.lock().read_waiters.sleep_interruptible() {
                    return err(KernelError::Interrupted);
                }
            }
            _ => return err(KernelError::InvalidArgument),
        }
    }
}

fn sys_write(fd: usize, ptr: u64, len: usize) -> u64 {
    if len == 0 || len > MAX_RW_LEN {
        return err(KernelError::InvalidArgument);
    }
    if let Err(e) = validate_user_buf(ptr, len as u64, false) {
        return err(e);
    }
    let file_arc = match current_fd_arc(fd) {
        Ok(f) => f,
        Err(e) => return err(e),
    };
    let slice = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };

    use crate::fs::fd::FileType;
    loop {
        let mut file = file_arc.lock();
        if !file.writable {
            return err(KernelError::PermissionDenied);
        }
        match &mut file.file_type {
            FileType::Console => {
                if let Ok(s) = core::str::from_utf8(slice) {
                    crate::print!("{}", s);
                }
                return len as u64;
            }
            FileType::Regular => return len as u64,
            FileType::PipeWrite(pipe) => {
                let mut inner = pipe.lock();
                if !inner.is_full() {
                    return inner.write(slice) as u64;
                }
                if inner.active_readers() == 0 {
                    return err(KernelError::IoError); // EPIPE
                }
                drop(inner);
                let waiters_ptr = pipe.clone();
                drop(file);
                if !waiters_ptr.lock().write_waiters.sleep_interruptible() {
                    return err(KernelError::Interrupted);
                }
            }
            _ => return err(KernelError::InvalidArgument),
        }
    }
}

fn free_fd(cur: &mut crate::task::process::Process, from: usize) -> Option<usize> {
    cur.next_free_fd(from)
}

fn sys_open(path_ptr: u64, path_len: usize) -> u64 {
    if path_len == 0 || path_len > 4096 {
        return err(KernelError::InvalidArgument);
    }
    if let Err(e) = validate_user_buf(path_ptr, path_len as u64, false) {
        return err(e);
    }
    let slice = unsafe { core::slice::from_raw_parts(path_ptr as *const u8, path_len) };
    let path = match core::str::from_utf8(slice) {
        Ok(p) => p,
        Err(_) => return err(KernelError::InvalidArgument),
    };

    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    match free_fd(cur, 0) {
        Some(fd) => {
            cur.fd_table[fd] = Some(crate::fs::fd::File::new_regular(path, true, true));
            fd as u64
        }
        None => err(KernelError::ResourceLimit),
    }
}

fn sys_close(fd: usize) -> u64 {
    if fd >= FD_TABLE_SIZE {
        return err(KernelError::InvalidArgument);
    }
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    cur.fd_table[fd] = None;
    0
}

fn sys_dup(old_fd: usize) -> u64 {
    if old_fd >= FD_TABLE_SIZE {
        return err(KernelError::InvalidArgument);
    }
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    let file_arc = match cur.fd_table[old_fd].clone() {
        Some(f) => f,
        None => return err(KernelError::NotFound),
    };
    match free_fd(cur, 0) {
        Some(new_fd) => {
            cur.fd_table[new_fd] = Some(file_arc);
            new_fd as u64
        }
        None => err(KernelError::ResourceLimit),
    }
}

fn sys_dup2(old_fd: usize, new_fd: usize) -> u64 {
    if old_fd >= FD_TABLE_SIZE || new_fd >= FD_TABLE_SIZE {
        return err(KernelError::InvalidArgument);
    }
    if old_fd == new_fd {
        return new_fd as u64;
    }
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    let file_arc = match cur.fd_table[old_fd].clone() {
        Some(f) => f,
        None => return err(KernelError::NotFound),
    };
    cur.fd_table[new_fd] = Some(file_arc);
    new_fd as u64
}

fn sys_pipe(fds_ptr: u64) -> u64 {
    if let Err(e) = validate_user_buf(fds_ptr, 8, true) {
        return err(e);
    }
    use crate::fs::fd::{File, FileType};
    use crate::fs::pipe::PipeInner;

    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    let fd0 = match free_fd(cur, 0) {
        Some(fd) => fd,
        None => return err(KernelError::ResourceLimit),
    };
    let fd1 = match free_fd(cur, fd0 + 1) {
        Some(fd) => fd,
        None => return err(KernelError::ResourceLimit),
    };

    let inner = PipeInner::new();
    inner.lock().add_reader();
    inner.lock().add_writer();

    cur.fd_table[fd0] = Some(alloc::sync::Arc::new(spin::Mutex::new(File {
        file_type: FileType::PipeRead(inner.clone()),
        path: alloc::string::String::from("pipe"),
        offset: 0,
        readable: true,
        writable: false,
    })));
    cur.fd_table[fd1] = Some(alloc::sync::Arc::new(spin::Mutex::new(File {
        file_type: FileType::PipeWrite(inner),
        path: alloc::string::String::from("pipe"),
        offset: 0,
        readable: false,
        writable: true,
    })));

    let fds_out = fds_ptr as *mut [u32; 2];
    unsafe {
        (*fds_out)[0] = fd0 as u32;
        (*fds_out)[1] = fd1 as u32;
    }
    0
}

fn sys_waitpid(target: u64, options: u64) -> u64 {
    let target = if target == 0 { None } else { Some(ProcessId(target)) };
    match sched::waitpid(target, options) {
        Ok((pid, status)) => pid.0 | (status << 32), // packed for the kernel-side test harness; real ABI returns via an out-pointer
        Err(e) => err(e),
    }
}

fn sys_kill(target: u64, sig: u32) -> u64 {
    match sched::raise_signal(ProcessId(target), sig) {
        Ok(()) => 0,
        Err(e) => err(e),
    }
}

fn sys_sigaction(sig: u32, handler_ptr: u64, mask_bits: u64) -> u64 {
    let handler = match handler_ptr {
        0 => SigHandler::Default,
        1 => SigHandler::Ignore,
        addr => SigHandler::User(addr as usize),
    };
    let action = SigAction { handler, mask: SigSet::from_raw(mask_bits as u32), flags: SaFlags::empty() };
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    cur.signals.set_action(sig, action);
    0
}

fn sys_sigprocmask(_how: u32, mask_bits: u64) -> u64 {
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    cur.signals.set_blocked(SigSet::from_raw(mask_bits as u32));
    0
}

fn sys_sched_setparam(target: u64, priority: u8, period: u64, wcet: u64) -> u64 {
    let params = crate::task::process::SchedParams {
        priority,
        period: if period == 0 { None } else { Some(period) },
        wcet: if wcet == 0 { None } else { Some(wcet) },
    };
    match sched::sched_setparam(ProcessId(target), params) {
        Ok(()) => 0,
        Err(e) => err(e),
    }
}

/// Admit `task` under whichever feasibility policy was selected at build
/// time via the `rm`/`edf` Cargo features (mutually exclusive; `edf` is the
/// default).
fn admit_periodic(task: crate::sched::rm::PeriodicTask) -> Result<(), KernelError> {
    #[cfg(feature = "rm")]
    {
        crate::sched::rm::admit(task)
    }
    #[cfg(not(feature = "rm"))]
    {
        crate::sched::edf::admit(task)
    }
}

/// First call for a task admits it under the active feasibility policy and
/// records its first period boundary. Every later call blocks until that
/// boundary (the tick count [`crate::interrupts::idt::ticks`] reaches
/// `next_wake`), marks the period just completed `executed`, and advances
/// `next_wake` by `period`.
fn sys_waitperiod(_target: u64, period: u64, wcet: u64) -> u64 {
    if period == 0 {
        return err(KernelError::InvalidArgument);
    }
    let already_admitted = {
        let sched = SCHEDULER.lock();
        let cur = sched.current.as_ref().expect("syscall: no active task");
        cur.periodic.is_some()
    };

    if !already_admitted {
        let task = crate::sched::rm::PeriodicTask { period, wcet };
        if admit_periodic(task).is_err() {
            return err(KernelError::NotSchedulable);
        }
        let mut sched = SCHEDULER.lock();
        let cur = sched.current.as_mut().expect("syscall: no active task");
        cur.periodic = Some(crate::task::process::PeriodicState {
            next_wake: crate::interrupts::idt::ticks() + period,
            executed: false,
        });
        return 0;
    }

    let next_wake = {
        let sched = SCHEDULER.lock();
        sched.current.as_ref().expect("syscall: no active task").periodic.unwrap().next_wake
    };
    while crate::interrupts::idt::ticks() < next_wake {
        sched::yield_now();
    }

    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    if let Some(p) = cur.periodic.as_mut() {
        p.executed = true;
        p.next_wake += period;
    }
    0
}

/// Grow the heap by one page at `requested_end` (page-aligned down). This
/// kernel has no demand paging and no tracked break pointer, so unlike
/// Linux's `brk` this always extends rather than truncating on a lower
/// address — callers only ever call it to grow.
fn sys_brk(requested_end: u64) -> u64 {
    if requested_end == 0 {
        return 0;
    }
    const PAGE: u64 = 4096;
    let page_addr = requested_end & !(PAGE - 1);
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    let mm = match cur.mm.as_mut() {
        Some(mm) => mm,
        None => return err(KernelError::InvalidArgument),
    };
    use crate::memory::vma::VmaFlags;
    match mm.map_anonymous(x86_64::VirtAddr::new(page_addr), PAGE, VmaFlags::READ | VmaFlags::WRITE | VmaFlags::USER) {
        Ok(()) => requested_end,
        Err(e) => err(e),
    }
}

/// `execve`: load `image_name` (read from user memory at `path_ptr`/`path_len`)
/// as a fresh ELF image and replace the calling task's address space with it.
/// On success this never returns to the caller in the ordinary sense — the
/// task's saved context now resumes at the loader's kernel-mode trampoline,
/// which itself drops to the new program's ring-3 entry point.
fn sys_execve(path_ptr: u64, path_len: usize) -> u64 {
    if path_len == 0 || path_len > 4096 {
        return err(KernelError::InvalidArgument);
    }
    if let Err(e) = validate_user_buf(path_ptr, path_len as u64, false) {
        return err(e);
    }
    let slice = unsafe { core::slice::from_raw_parts(path_ptr as *const u8, path_len) };
    let path = match core::str::from_utf8(slice) {
        Ok(p) => p,
        Err(_) => return err(KernelError::InvalidArgument),
    };

    let (mm, trampoline_entry) = match crate::loader::elf::load(path) {
        Ok(pair) => pair,
        Err(e) => return err(e.into()),
    };

    sched::exec(mm, alloc::string::String::from(path), trampoline_entry);
    0
}

/// Only the superuser may change to a uid other than its own.
fn sys_setuid(new_uid: u32) -> u64 {
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    if cur.uid != 0 && cur.uid != new_uid {
        return err(KernelError::PermissionDenied);
    }
    cur.uid = new_uid;
    0
}

fn sys_setgid(new_gid: u32) -> u64 {
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    if cur.uid != 0 && cur.gid != new_gid {
        return err(KernelError::PermissionDenied);
    }
    cur.gid = new_gid;
    0
}

fn default_perms() -> Permissions {
    Permissions { uid: 0, gid: 0, mode: 0o600 }
}

fn sys_semget(key: u64, nsems: usize, flags: u32) -> u64 {
    let create = flags & ipc::IPC_CREAT != 0;
    let excl = flags & ipc::IPC_EXCL != 0;
    match crate::ipc::sem::semget(Key(key as u32), nsems, create, excl, default_perms()) {
        Ok(id) => id.0 as u64,
        Err(e) => err(e),
    }
}

fn sys_semop(id: u64, ops_ptr: u64, n: usize) -> u64 {
    if n == 0 || n > crate::ipc::sem::SEM_MAX_PER_SET {
        return err(KernelError::InvalidArgument);
    }
    let ops = unsafe { core::slice::from_raw_parts(ops_ptr as *const crate::ipc::sem::SemOp, n) };
    match crate::ipc::sem::semop(crate::ipc::IpcId(id as u32), ops) {
        Ok(()) => 0,
        Err(e) => err(e),
    }
}

fn sys_semctl(id: u64, cmd: i32) -> u64 {
    if cmd == ipc::IPC_RMID {
        match crate::ipc::sem::semctl_rmid(crate::ipc::IpcId(id as u32), Key::IPC_PRIVATE) {
            Ok(()) => 0,
            Err(e) => err(e),
        }
    } else {
        err(KernelError::InvalidArgument)
    }
}

fn sys_msgget(key: u64, flags: u32) -> u64 {
    let create = flags & ipc::IPC_CREAT != 0;
    let excl = flags & ipc::IPC_EXCL != 0;
    match crate::ipc::msg::msgget(Key(key as u32), create, excl, default_perms()) {
        Ok(id) => id.0 as u64,
        Err(e) => err(e),
    }
}

fn sys_msgsnd(id: u64, mtype: i64, data_ptr: u64, data_len: usize, nowait: bool) -> u64 {
    if let Err(e) = validate_user_buf(data_ptr, data_len as u64, false) {
        return err(e);
    }
    let slice = unsafe { core::slice::from_raw_parts(data_ptr as *const u8, data_len) };
    match crate::ipc::msg::msgsnd(crate::ipc::IpcId(id as u32), mtype, slice.to_vec(), nowait) {
        Ok(()) => 0,
        Err(e) => err(e),
    }
}

fn sys_msgrcv(id: u64, type_filter: i64, nowait: bool) -> u64 {
    match crate::ipc::msg::msgrcv(crate::ipc::IpcId(id as u32), type_filter, nowait) {
        Ok(msg) => msg.data.len() as u64,
        Err(e) => err(e),
    }
}

fn sys_msgctl(id: u64, cmd: i32) -> u64 {
    if cmd == ipc::IPC_RMID {
        match crate::ipc::msg::msgctl_rmid(crate::ipc::IpcId(id as u32), Key::IPC_PRIVATE) {
            Ok(()) => 0,
            Err(e) => err(e),
        }
    } else {
        err(KernelError::InvalidArgument)
    }
}

fn sys_shmget(key: u64, size: usize, flags: u32) -> u64 {
    let create = flags & ipc::IPC_CREAT != 0;
    let excl = flags & ipc::IPC_EXCL != 0;
    match crate::ipc::shm::shmget(Key(key as u32), size, create, excl, default_perms()) {
        Ok(id) => id.0 as u64,
        Err(e) => err(e),
    }
}

fn sys_shmat(id: u64, addr: u64, writable: bool) -> u64 {
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    let mm = match cur.mm.as_mut() {
        Some(mm) => mm,
        None => return err(KernelError::InvalidArgument),
    };
    match crate::ipc::shm::shmat(crate::ipc::IpcId(id as u32), mm, x86_64::VirtAddr::new(addr), writable) {
        Ok(()) => addr,
        Err(e) => err(e),
    }
}

fn sys_shmdt(id: u64, addr: u64, size: u64) -> u64 {
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("syscall: no active task");
    let mm = match cur.mm.as_mut() {
        Some(mm) => mm,
        None => return err(KernelError::InvalidArgument),
    };
    match crate::ipc::shm::shmdt(crate::ipc::IpcId(id as u32), mm, x86_64::VirtAddr::new(addr), size) {
        Ok(()) => 0,
        Err(e) => err(e),
    }
}

fn sys_shmctl(id: u64, cmd: i32) -> u64 {
    if cmd == ipc::IPC_RMID {
        match crate::ipc::shm::shmctl_rmid(crate::ipc::IpcId(id as u32), Key::IPC_PRIVATE) {
            Ok(()) => 0,
            Err(e) => err(e),
        }
    } else {
        err(KernelError::InvalidArgument)
    }
}

/// `uname`: writes a fixed `struct utsname`-shaped set of NUL-terminated
/// 65-byte fields (sysname/nodename/release/version/machine) to `buf`.
fn sys_uname(buf_ptr: u64) -> u64 {
    const FIELD: usize = 65;
    if let Err(e) = validate_user_buf(buf_ptr, (FIELD * 5) as u64, true) {
        return err(e);
    }
    let fields: [&[u8]; 5] = [b"teaching-os", b"localhost", b"0.1.0", b"#1", b"x86_64"];
    let out = buf_ptr as *mut u8;
    unsafe {
        for (i, field) in fields.iter().enumerate() {
            let base = out.add(i * FIELD);
            core::ptr::write_bytes(base, 0, FIELD);
            core::ptr::copy_nonoverlapping(field.as_ptr(), base, field.len().min(FIELD - 1));
        }
    }
    0
}

pub fn init() {
    crate::log_info!("syscall: dispatch table initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_perms_are_owner_only() {
        assert_eq!(default_perms().mode, 0o600);
    }
}
