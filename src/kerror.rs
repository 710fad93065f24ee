//! Kernel-wide error taxonomy.
//!
//! Every fallible kernel operation returns a `KernelError` rather than a raw
//! errno; the syscall dispatch layer is the single place that negates one
//! into the `-errno` convention user space expects.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No physical frames (or no cache/kmalloc class capacity) available.
    OutOfMemory,
    /// A caller-supplied argument is structurally invalid (bad size, bad
    /// flag combination, overlapping range, negative count, ...).
    InvalidArgument,
    /// A user pointer falls outside any mapped VMA, or requests a
    /// permission the VMA does not grant.
    Fault,
    /// An address/length computation would wrap.
    Overflow,
    /// No such process, file descriptor, IPC key, or similar lookup miss.
    NotFound,
    /// No task or process group with the given id exists.
    NoSuchProcess,
    /// `waitpid` target has no children left to reap.
    NoChildren,
    /// Identifier space (PIDs, IPC ids, file descriptors) is exhausted.
    ResourceLimit,
    /// Operation not permitted for the calling task's credentials.
    PermissionDenied,
    /// Object already exists where `CREAT | EXCL`-style semantics forbid it.
    AlreadyExists,
    /// Blocking call interrupted by a delivered signal before it completed.
    Interrupted,
    /// Device-level I/O failure (ATA status register reported an error).
    IoError,
    /// Would need to block but the caller asked for non-blocking semantics.
    WouldBlock,
    /// Deadlock-prevention or re-entrancy contract violated by the caller.
    Deadlock,
    /// A periodic task's (period, wcet) would push total utilization past
    /// what the active scheduling policy can guarantee.
    NotSchedulable,
    /// Syscall number names a service this kernel never implements
    /// (`mount`, `ioctl`, `mmap` against a real filesystem).
    Unsupported,
}

impl KernelError {
    /// POSIX errno this maps to, as a positive magnitude — syscall dispatch
    /// negates it before returning to user space.
    pub const fn errno(self) -> i64 {
        match self {
            KernelError::OutOfMemory => 12,      // ENOMEM
            KernelError::InvalidArgument => 22,  // EINVAL
            KernelError::Fault => 14,            // EFAULT
            KernelError::Overflow => 75,         // EOVERFLOW
            KernelError::NotFound => 2,          // ENOENT
            KernelError::NoSuchProcess => 3,     // ESRCH
            KernelError::NoChildren => 10,       // ECHILD
            KernelError::ResourceLimit => 24,    // EMFILE (closest fit; callers needing
                                                  // EAGAIN-on-exhaustion override explicitly)
            KernelError::PermissionDenied => 1,  // EPERM
            KernelError::AlreadyExists => 17,    // EEXIST
            KernelError::Interrupted => 4,       // EINTR
            KernelError::IoError => 5,           // EIO
            KernelError::WouldBlock => 11,       // EAGAIN
            KernelError::Deadlock => 35,         // EDEADLK
            KernelError::NotSchedulable => 100,   // custom: ENOTSCHEDULABLE (no standard errno)
            KernelError::Unsupported => 38,       // ENOSYS
        }
    }
}

impl From<KernelError> for i64 {
    fn from(e: KernelError) -> i64 {
        -e.errno()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negated_errno_is_never_positive() {
        let all = [
            KernelError::OutOfMemory,
            KernelError::InvalidArgument,
            KernelError::Fault,
            KernelError::Overflow,
            KernelError::NotFound,
            KernelError::NoSuchProcess,
            KernelError::NoChildren,
            KernelError::ResourceLimit,
            KernelError::PermissionDenied,
            KernelError::AlreadyExists,
            KernelError::Interrupted,
            KernelError::IoError,
            KernelError::WouldBlock,
            KernelError::Deadlock,
            KernelError::NotSchedulable,
            KernelError::Unsupported,
        ];
        for e in all {
            let code: i64 = e.into();
            assert!(code < 0);
        }
    }
}
