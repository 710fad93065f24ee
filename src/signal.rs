//! Per-task signal state: blocked/pending masks and the `sigaction` table.
//!
//! `SigSet` mirrors the spec's "two 32-bit words" shape for `sigset_t`
//! operations — signals are numbered 1..=31, bit `n` of the mask corresponds
//! to signal `n`. `SIGKILL`/`SIGSTOP` are kept out of every mask-mutating
//! path (`block`, `sigaction`) rather than filtered at delivery time, so a
//! task can never observe them as blocked or caught even transiently.

pub const NSIG: usize = 32;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGABRT: u32 = 6;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGSEGV: u32 = 11;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGUSR1: u32 = 10;
pub const SIGUSR2: u32 = 12;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;

/// A 32-bit bitmask over signal numbers 1..=31. Bit 0 is unused (there is no
/// signal 0; `kill(pid, 0)` is the "does this pid exist" probe handled
/// separately by the syscall layer, not represented here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigSet(u32);

impl SigSet {
    pub const EMPTY: SigSet = SigSet(0);

    pub const fn empty() -> Self {
        SigSet(0)
    }

    pub(crate) const fn bit(sig: u32) -> u32 {
        if sig == 0 || sig as usize >= NSIG {
            0
        } else {
            1 << sig
        }
    }

    const fn single(sig: u32) -> SigSet {
        SigSet(Self::bit(sig))
    }

    pub fn add(&mut self, sig: u32) {
        self.0 |= Self::bit(sig);
    }

    pub fn remove(&mut self, sig: u32) {
        self.0 &= !Self::bit(sig);
    }

    pub fn contains(&self, sig: u32) -> bool {
        self.0 & Self::bit(sig) != 0
    }

    pub fn union(self, other: SigSet) -> SigSet {
        SigSet(self.0 | other.0)
    }

    pub fn intersect(self, other: SigSet) -> SigSet {
        SigSet(self.0 & other.0)
    }

    pub fn difference(self, other: SigSet) -> SigSet {
        SigSet(self.0 & !other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Lowest-numbered set signal, for delivery order.
    pub fn lowest(&self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn from_raw(bits: u32) -> Self {
        SigSet(bits)
    }

    /// `SIGKILL`/`SIGSTOP` stripped, per the unmaskable-signal invariant.
    pub fn maskable(self) -> Self {
        SigSet(self.0 & !(Self::bit(SIGKILL) | Self::bit(SIGSTOP)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigHandler {
    Default,
    Ignore,
    /// User-space handler entry point, installed via `sigaction`.
    User(usize),
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SaFlags: u32 {
        /// Restart the interrupted syscall instead of returning `EINTR`.
        const SA_RESTART = 0x1;
        /// Do not add `sig` itself to the blocked mask while its handler runs.
        const SA_NODEFER = 0x2;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SigAction {
    pub handler: SigHandler,
    pub mask: SigSet,
    pub flags: SaFlags,
}

impl Default for SigAction {
    fn default() -> Self {
        SigAction { handler: SigHandler::Default, mask: SigSet::empty(), flags: SaFlags::empty() }
    }
}

/// A task's execution state stashed while a `SigHandler::User` handler
/// runs, so `sigreturn` can restore exactly where delivery interrupted it.
#[derive(Debug, Clone, Copy)]
pub struct SavedSignalFrame {
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
    pub blocked: SigSet,
}

/// Per-task signal state, embedded directly in `Process` (never shared
/// across tasks — `fork` copies it, `exec` partially resets it per 4.5).
#[derive(Debug, Clone)]
pub struct SignalState {
    pub blocked: SigSet,
    pub pending: SigSet,
    action: [SigAction; NSIG],
}

impl SignalState {
    pub fn new() -> Self {
        SignalState { blocked: SigSet::empty(), pending: SigSet::empty(), action: [SigAction::default(); NSIG] }
    }

    pub fn action(&self, sig: u32) -> SigAction {
        self.action[sig as usize]
    }

    /// Install a new action for `sig`. `SIGKILL`/`SIGSTOP` silently ignore
    /// an attempt to install a handler, matching Linux `sigaction(2)`'s
    /// `EINVAL`-free "always SIG_DFL" treatment of those two signals.
    pub fn set_action(&mut self, sig: u32, action: SigAction) {
        if sig == SIGKILL || sig == SIGSTOP || sig as usize >= NSIG {
            return;
        }
        self.action[sig as usize] = action;
    }

    /// Reset handlers that were user-installed back to `SIG_DFL`, keeping
    /// ones explicitly set to `SIG_IGN` — the `execve` contract in 4.5.
    pub fn reset_on_exec(&mut self) {
        for a in self.action.iter_mut() {
            if let SigHandler::User(_) = a.handler {
                *a = SigAction::default();
            }
        }
    }

    /// Raise `sig` against this task (`kill`/`SIGCHLD` delivery path).
    pub fn raise(&mut self, sig: u32) {
        self.pending.add(sig);
    }

    /// A deliverable signal exists if it is pending and not blocked.
    /// `SIGKILL`/`SIGSTOP` are always deliverable regardless of `blocked`.
    pub fn has_deliverable(&self) -> bool {
        self.deliverable().lowest().is_some()
    }

    fn deliverable(&self) -> SigSet {
        let forced = self.pending.intersect(SigSet::single(SIGKILL).union(SigSet::single(SIGSTOP)));
        self.pending.difference(self.blocked).union(forced)
    }

    /// Next signal to deliver, and what delivering it does to the mask
    /// state: clears it from `pending`, and — unless `SA_NODEFER` — adds it
    /// (plus the handler's own `sa_mask`) to `blocked` while the handler
    /// conceptually runs. Returns `None` if nothing is deliverable.
    pub fn take_deliverable(&mut self) -> Option<(u32, SigAction)> {
        let sig = self.deliverable().lowest()?;
        self.pending.remove(sig);
        let action = self.action(sig);
        if !action.flags.contains(SaFlags::SA_NODEFER) {
            self.blocked = self.blocked.union(action.mask).union(SigSet::single(sig));
        }
        Some((sig, action))
    }

    /// Apply a `sigprocmask`-style mutation, keeping `SIGKILL`/`SIGSTOP`
    /// out of `blocked` regardless of what the caller asked to add.
    pub fn set_blocked(&mut self, mask: SigSet) {
        self.blocked = mask.maskable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigkill_and_sigstop_never_enter_blocked() {
        let mut st = SignalState::new();
        let mut wanted = SigSet::empty();
        wanted.add(SIGKILL);
        wanted.add(SIGSTOP);
        wanted.add(SIGTERM);
        st.set_blocked(wanted);
        assert!(!st.blocked.contains(SIGKILL));
        assert!(!st.blocked.contains(SIGSTOP));
        assert!(st.blocked.contains(SIGTERM));
    }

    #[test]
    fn sigkill_delivers_even_when_blocked() {
        let mut st = SignalState::new();
        st.blocked.add(SIGTERM); // direct field mutation bypassing set_blocked, simulating a stale mask
        st.raise(SIGKILL);
        assert!(st.has_deliverable());
        let (sig, _) = st.take_deliverable().unwrap();
        assert_eq!(sig, SIGKILL);
    }

    #[test]
    fn blocked_signal_is_not_deliverable() {
        let mut st = SignalState::new();
        st.blocked.add(SIGUSR1);
        st.raise(SIGUSR1);
        assert!(!st.has_deliverable());
    }

    #[test]
    fn delivery_is_lowest_numbered_first() {
        let mut st = SignalState::new();
        st.raise(SIGTERM);
        st.raise(SIGHUP);
        let (sig, _) = st.take_deliverable().unwrap();
        assert_eq!(sig, SIGHUP);
    }

    #[test]
    fn reset_on_exec_clears_user_handlers_but_keeps_ignore() {
        let mut st = SignalState::new();
        st.set_action(SIGTERM, SigAction { handler: SigHandler::User(0x4000), mask: SigSet::empty(), flags: SaFlags::empty() });
        st.set_action(SIGHUP, SigAction { handler: SigHandler::Ignore, mask: SigSet::empty(), flags: SaFlags::empty() });
        st.reset_on_exec();
        assert_eq!(st.action(SIGTERM).handler, SigHandler::Default);
        assert_eq!(st.action(SIGHUP).handler, SigHandler::Ignore);
    }

    #[test]
    fn sigaction_on_sigkill_is_a_silent_noop() {
        let mut st = SignalState::new();
        st.set_action(SIGKILL, SigAction { handler: SigHandler::Ignore, mask: SigSet::empty(), flags: SaFlags::empty() });
        assert_eq!(st.action(SIGKILL).handler, SigHandler::Default);
    }

    #[test]
    fn take_deliverable_defers_signal_unless_nodefer() {
        let mut st = SignalState::new();
        st.raise(SIGUSR1);
        let (sig, _) = st.take_deliverable().unwrap();
        assert_eq!(sig, SIGUSR1);
        assert!(st.blocked.contains(SIGUSR1));
    }
}
