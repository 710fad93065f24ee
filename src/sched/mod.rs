//! The runqueue, context switching, and process lifecycle (fork/exec/exit/
//! wait). Grounded on the teacher's cooperative scheduler, generalized from
//! a single fixed FIFO policy to the pluggable [`policy::SchedPolicy`] and
//! from a raw CR3 + allocation-list process record to [`crate::task::Process`]
//! with a real [`crate::memory::Mm`].

pub mod context;
pub mod edf;
pub mod policy;
pub mod rm;
pub mod wait_queue;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use context::Context;
use crate::kerror::KernelError;
use crate::memory::Mm;
use crate::signal::SignalState;
use crate::task::process::{Process, ProcessId, ProcessState, SchedParams};

/// Each task's kernel stack (16 KiB), same size the teacher used.
const TASK_STACK_SIZE: usize = 4096 * 4;

pub struct Scheduler {
    pub current: Option<Process>,
    pub ready_queue: VecDeque<Process>,
    next_id_hint: u64,
    pub active: bool,
    policy: Box<dyn policy::SchedPolicy>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            current: None,
            ready_queue: VecDeque::new(),
            next_id_hint: 1,
            active: false,
            policy: Box::new(policy::RoundRobin),
        }
    }

    pub fn set_policy(&mut self, policy: Box<dyn policy::SchedPolicy>) {
        self.policy = policy;
    }

    /// Pop the next task the active policy selects, leaving everything else
    /// (including non-`Ready` entries) in the queue in order.
    fn pop_next_ready(&mut self) -> Option<Process> {
        let idx = self.policy.pick(self.ready_queue.make_contiguous())?;
        self.ready_queue.remove(idx)
    }

    fn find_by_pid_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        if let Some(cur) = self.current.as_mut() {
            if cur.pid == pid {
                return Some(cur);
            }
        }
        self.ready_queue.iter_mut().find(|p| p.pid == pid)
    }
}

lazy_static! {
    pub static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

fn new_kernel_stack() -> (Box<[u8]>, u64) {
    let stack = vec![0u8; TASK_STACK_SIZE].into_boxed_slice();
    let mut top = stack.as_ptr() as u64 + TASK_STACK_SIZE as u64;
    top &= !0xF;
    (stack, top)
}

/// Bring up the scheduler with PID 0 (the bootstrap kernel task) as current.
/// Its context is filled in on the first switch away from it.
pub fn init() {
    let mut sched = SCHEDULER.lock();
    let kernel = Process {
        pid: ProcessId(0),
        ppid: None,
        pgid: ProcessId(0),
        sid: ProcessId(0),
        uid: 0,
        gid: 0,
        name: String::from("kernel"),
        state: ProcessState::Running,
        exit_status: None,
        children: Vec::new(),
        sched: SchedParams::default(),
        periodic: None,
        context: Context::empty(),
        mm: None,
        kernel_stack: Box::new([]),
        fd_table: Process::new_fd_table(),
        signals: SignalState::new(),
        errno: 0,
        saved_signal: None,
    };
    sched.current = Some(kernel);
    sched.active = true;
    drop(sched);
    crate::log_info!("sched: cooperative scheduler initialized");
}

/// Spawn a fresh kernel-only task (no user address space) running `entry`.
pub fn spawn_kernel_task(entry: fn(), name: &str) -> ProcessId {
    let mut sched = SCHEDULER.lock();
    let id = ProcessId(sched.next_id_hint);
    sched.next_id_hint += 1;

    let (stack, stack_top) = new_kernel_stack();
    let ctx = Context::new(entry as u64, stack_top);
    let parent = sched.current.as_ref().map(|c| c.pid);

    let process = Process {
        pid: id,
        ppid: parent,
        pgid: parent.unwrap_or(id),
        sid: parent.unwrap_or(id),
        uid: 0,
        gid: 0,
        name: String::from(name),
        state: ProcessState::Ready,
        exit_status: None,
        children: Vec::new(),
        sched: SchedParams::default(),
        periodic: None,
        context: ctx,
        mm: None,
        kernel_stack: stack,
        fd_table: Process::new_fd_table(),
        signals: SignalState::new(),
        errno: 0,
        saved_signal: None,
    };
    sched.ready_queue.push_back(process);
    id
}

/// The currently running task's pid. Only meaningful when called from
/// kernel context with the scheduler active; panics otherwise, since that
/// indicates a call from outside any task (a structural bug).
pub fn current_pid() -> ProcessId {
    SCHEDULER.lock().current.as_ref().expect("sched: current_pid with no active task").pid
}

pub fn has_pending_signal(pid: ProcessId) -> bool {
    SCHEDULER
        .lock()
        .find_by_pid_mut(pid)
        .map(|p| p.signals.has_deliverable())
        .unwrap_or(false)
}

/// Mark `pid`'s state `Ready` if it's currently `Blocked` — the wake half of
/// [`wait_queue::WaitQueue`]. A no-op if the task isn't found (it may have
/// already exited) or wasn't actually blocked.
pub fn set_ready(pid: ProcessId) {
    let mut sched = SCHEDULER.lock();
    if let Some(p) = sched.find_by_pid_mut(pid) {
        if p.state == ProcessState::Blocked {
            p.state = ProcessState::Ready;
        }
    }
}

/// Mark the current task `Blocked` and switch away. Returns once some other
/// caller has flipped it back to `Ready` via [`set_ready`] and the policy
/// has picked it again.
pub fn block_current_and_yield() {
    {
        let mut sched = SCHEDULER.lock();
        if let Some(cur) = sched.current.as_mut() {
            cur.state = ProcessState::Blocked;
        }
    }
    yield_now();
}

/// Cooperatively hand the CPU to the next task the policy selects. A no-op
/// if the scheduler is inactive, there is nothing else runnable, or (when
/// called from `try_yield_now`) the scheduler is already locked elsewhere.
fn do_yield(try_only: bool) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = if try_only {
            match SCHEDULER.try_lock() {
                Some(l) => l,
                None => return,
            }
        } else {
            SCHEDULER.lock()
        };

        if !sched.active {
            return;
        }

        let mut current = match sched.current.take() {
            Some(c) => c,
            None => return,
        };

        let next = match sched.pop_next_ready() {
            Some(n) => n,
            None => {
                sched.current = Some(current);
                return;
            }
        };

        if current.state == ProcessState::Running {
            current.state = ProcessState::Ready;
        }
        let mut next = next;
        next.state = ProcessState::Running;

        let mut next_stack_top = next.kernel_stack.as_ptr() as u64 + next.kernel_stack.len() as u64;
        next_stack_top &= !0xF;
        if next_stack_top != 0 {
            crate::interrupts::gdt::set_tss_rsp0(next_stack_top);
        }

        if let Some(mm) = next.mm.as_ref() {
            unsafe { activate_address_space(mm); }
        }

        sched.ready_queue.push_back(current);
        sched.current = Some(next);

        let current_ctx_ptr = &mut sched.ready_queue.back_mut().unwrap().context as *mut Context;
        let next_ctx_ptr = &sched.current.as_ref().unwrap().context as *const Context;
        drop(sched);

        unsafe { context::switch_context(current_ctx_ptr, next_ctx_ptr) };
    });
}

unsafe fn activate_address_space(mm: &Mm) {
    use x86_64::registers::control::{Cr3, Cr3Flags};
    use x86_64::structures::paging::PhysFrame;
    let frame = PhysFrame::containing_address(mm.pml4_phys);
    Cr3::write(frame, Cr3Flags::empty());
}

pub fn yield_now() {
    do_yield(false);
}

pub fn try_yield_now() {
    do_yield(true);
}

/// Terminate the current task: release its address space and fd table,
/// record its exit status, wake a blocked parent, and switch away without
/// ever returning. Reaping (PID release, removal from the zombie list)
/// happens later in [`waitpid`].
pub fn exit_current(status: i32, signaled_by: Option<u32>) -> ! {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        let mut finished = sched.current.take().expect("sched: exit_current with no active task");

        if let Some(mm) = finished.mm.take() {
            mm.destroy();
        }
        finished.fd_table.clear();
        finished.state = ProcessState::Zombie;
        finished.exit_status = Some(encode_exit_status(status, signaled_by));

        if let Some(ppid) = finished.ppid {
            for p in sched.ready_queue.iter_mut() {
                if p.pid == ppid && p.state == ProcessState::Blocked {
                    p.state = ProcessState::Ready;
                }
            }
        }
        crate::task::pid::free(finished.pid.0);

        sched.ready_queue.push_back(finished);

        let next = loop {
            match sched.pop_next_ready() {
                Some(n) => break n,
                None => {
                    drop(sched);
                    loop {
                        x86_64::instructions::hlt();
                    }
                }
            }
        };
        let mut next = next;
        next.state = ProcessState::Running;

        let mut next_stack_top = next.kernel_stack.as_ptr() as u64 + next.kernel_stack.len() as u64;
        next_stack_top &= !0xF;
        if next_stack_top != 0 {
            crate::interrupts::gdt::set_tss_rsp0(next_stack_top);
        }
        if let Some(mm) = next.mm.as_ref() {
            unsafe { activate_address_space(mm); }
        }

        sched.current = Some(next);
        let next_ctx_ptr = &sched.current.as_ref().unwrap().context as *const Context;
        drop(sched);

        unsafe { context::restore_context(next_ctx_ptr) };
    });
    unreachable!("sched: exit_current must not return");
}

/// `WIFEXITED`/`WIFSIGNALED`-style packing: bit 8 set means "died from
/// signal `status & 0xff`", matching the shape userspace `wait(2)` macros
/// expect.
fn encode_exit_status(status: i32, signaled_by: Option<u32>) -> u64 {
    match signaled_by {
        Some(sig) => 0x100 | (sig as u64 & 0xff),
        None => (status as u64 & 0xff) << 8,
    }
}

pub fn list_tasks() -> Vec<(u64, String, String)> {
    let sched = SCHEDULER.lock();
    let mut out = Vec::new();
    if let Some(c) = sched.current.as_ref() {
        out.push((c.pid.0, c.name.clone(), String::from("running")));
    }
    for p in &sched.ready_queue {
        out.push((p.pid.0, p.name.clone(), alloc::format!("{:?}", p.state)));
    }
    out
}

/// Duplicate the calling task into a new, independently schedulable child.
/// Returns the child's pid; the child itself observes pid 0 the first time
/// it's scheduled (the syscall layer is responsible for translating that
/// into `fork`'s "0 in the child" contract via a per-task flag, since this
/// scheduler represents both parent and child as ordinary `Process` values
/// rather than a single divergent return value).
pub fn fork() -> Result<ProcessId, KernelError> {
    let child_pid = ProcessId(crate::task::pid::alloc()?);
    let mut sched = SCHEDULER.lock();
    let parent = sched.current.as_ref().expect("sched: fork with no active task");

    let child_mm = match parent.mm.as_ref() {
        Some(mm) => Some(mm.clone_for_fork()?),
        None => None,
    };

    let (stack, stack_top) = new_kernel_stack();
    let ctx = Context::new(fork_return_trampoline as u64, stack_top);

    let parent_pid = parent.pid;
    let child = Process {
        pid: child_pid,
        ppid: Some(parent.pid),
        pgid: parent.pgid,
        sid: parent.sid,
        uid: parent.uid,
        gid: parent.gid,
        name: parent.name.clone(),
        state: ProcessState::Ready,
        exit_status: None,
        children: Vec::new(),
        sched: parent.sched,
        periodic: parent.periodic,
        context: ctx,
        mm: child_mm,
        kernel_stack: stack,
        fd_table: parent.fd_table.clone(),
        signals: parent.signals.clone(),
        errno: 0,
        saved_signal: None,
    };

    sched.find_by_pid_mut(parent_pid).unwrap().children.push(child_pid);
    sched.ready_queue.push_back(child);
    Ok(child_pid)
}

/// Trampoline a freshly forked child's context points at; real kernels
/// splice in a full trap-frame restore here so the child resumes exactly
/// where the parent called `fork`. Out of scope for this crate's trap
/// layer — documented rather than wired to `interrupts::usermode`.
extern "C" fn fork_return_trampoline() -> ! {
    loop {
        yield_now();
    }
}

/// Replace the calling task's address space and reset its signal handlers,
/// per the `execve` contract: the new `Mm` owns the mapped segments; the
/// old one (if any) is destroyed.
/// Replace the current task's address space and run `entry_trampoline` on
/// its existing kernel stack. `entry_trampoline` is expected to be a
/// kernel-mode function (conventionally [`crate::loader::elf::usermode_trampoline`])
/// that itself performs the ring 0 → ring 3 `iretq` — the context switch
/// machinery here only ever jumps to ring-0 code, never directly to a user
/// address, so the real user entry/stack are threaded through separately.
pub fn exec(new_mm: Mm, new_name: String, entry_trampoline: u64) {
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("sched: exec with no active task");
    if let Some(old_mm) = cur.mm.take() {
        old_mm.destroy();
    }
    cur.mm = Some(new_mm);
    cur.name = new_name;
    cur.signals.reset_on_exec();
    let mut stack_top = cur.kernel_stack.as_ptr() as u64 + cur.kernel_stack.len() as u64;
    stack_top &= !0xF;
    cur.context = Context::new(entry_trampoline, stack_top);
}

/// `waitpid`'s `WNOHANG`: return immediately with pid 0 instead of blocking
/// when no matching zombie is ready yet.
pub const WNOHANG: u64 = 0x1;

/// Reap the first zombie child matching `target` (or any child if `target`
/// is `None`). Returns `(pid, exit_status)` on success; blocks the caller
/// and retries if children exist but none have exited yet, unless
/// `options` has `WNOHANG` set, in which case it returns `(ProcessId(0), 0)`
/// immediately instead. `NoChildren` if the caller has no matching children
/// at all.
pub fn waitpid(target: Option<ProcessId>, options: u64) -> Result<(ProcessId, u64), KernelError> {
    loop {
        let mut sched = SCHEDULER.lock();
        let me = sched.current.as_ref().expect("sched: waitpid with no active task").pid;
        let children = sched.find_by_pid_mut(me).unwrap().children.clone();
        if children.is_empty() || matches!(target, Some(t) if !children.contains(&t)) {
            return Err(KernelError::NoChildren);
        }

        let zombie_pos = sched.ready_queue.iter().position(|p| {
            p.state == ProcessState::Zombie
                && p.ppid == Some(me)
                && target.map_or(true, |t| p.pid == t)
        });

        if let Some(pos) = zombie_pos {
            let zombie = sched.ready_queue.remove(pos).unwrap();
            let status = zombie.exit_status.unwrap_or(0);
            let pid = zombie.pid;
            let parent = sched.find_by_pid_mut(me).unwrap();
            parent.children.retain(|&c| c != pid);
            return Ok((pid, status));
        }

        if options & WNOHANG != 0 {
            return Ok((ProcessId(0), 0));
        }

        if let Some(cur) = sched.current.as_mut() {
            cur.state = ProcessState::Blocked;
        }
        drop(sched);
        yield_now();

        if has_pending_signal(me) {
            return Err(KernelError::Interrupted);
        }
    }
}

/// `setsid`: make the caller the leader of a brand-new session and process
/// group (both set to its own pid). Fails if the caller is already a
/// process group leader.
pub fn setsid() -> Result<ProcessId, KernelError> {
    let mut sched = SCHEDULER.lock();
    let cur = sched.current.as_mut().expect("sched: setsid with no active task");
    if cur.pid == cur.pgid {
        return Err(KernelError::PermissionDenied);
    }
    cur.sid = cur.pid;
    cur.pgid = cur.pid;
    Ok(cur.pid)
}

/// `setpgid` cannot change the group of a session leader.
pub fn setpgid(target: ProcessId, pgid: ProcessId) -> Result<(), KernelError> {
    let mut sched = SCHEDULER.lock();
    let p = sched.find_by_pid_mut(target).ok_or(KernelError::NoSuchProcess)?;
    if p.pid == p.sid {
        return Err(KernelError::PermissionDenied);
    }
    p.pgid = if pgid.0 == 0 { target } else { pgid };
    Ok(())
}

/// `getsid(pid != 0)` requires the caller and target share a session.
pub fn getsid(caller: ProcessId, target: ProcessId) -> Result<ProcessId, KernelError> {
    let mut sched = SCHEDULER.lock();
    if caller == target {
        return sched.find_by_pid_mut(target).map(|p| p.sid).ok_or(KernelError::NoSuchProcess);
    }
    let caller_sid = sched.find_by_pid_mut(caller).ok_or(KernelError::NoSuchProcess)?.sid;
    let target_sid = sched.find_by_pid_mut(target).ok_or(KernelError::NoSuchProcess)?.sid;
    if caller_sid != target_sid {
        return Err(KernelError::PermissionDenied);
    }
    Ok(target_sid)
}

pub fn sched_setparam(target: ProcessId, params: SchedParams) -> Result<(), KernelError> {
    let mut sched = SCHEDULER.lock();
    let p = sched.find_by_pid_mut(target).ok_or(KernelError::NoSuchProcess)?;
    p.sched = params;
    Ok(())
}

pub fn sched_getparam(target: ProcessId) -> Result<SchedParams, KernelError> {
    let mut sched = SCHEDULER.lock();
    sched.find_by_pid_mut(target).map(|p| p.sched).ok_or(KernelError::NoSuchProcess)
}

/// Deliver `sig` to `target`'s pending mask.
pub fn raise_signal(target: ProcessId, sig: u32) -> Result<(), KernelError> {
    let mut sched = SCHEDULER.lock();
    let p = sched.find_by_pid_mut(target).ok_or(KernelError::NoSuchProcess)?;
    p.signals.raise(sig);
    if p.state == ProcessState::Blocked {
        p.state = ProcessState::Ready;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_encodes_signal_high_bit() {
        assert_eq!(encode_exit_status(0, Some(15)), 0x10f);
        assert_eq!(encode_exit_status(7, None), 0x700);
    }
}
