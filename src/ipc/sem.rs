//! System V semaphore sets. `semop` applies a batch of operations
//! atomically with respect to other `semop` callers on the same set: either
//! every op in the batch commits, or none does and the caller sleeps.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::ipc::{self, IpcId, Key, Permissions};
use crate::kerror::KernelError;
use crate::sched::wait_queue::WaitQueue;
use crate::sync::spinlock::SpinLock;

pub const SEM_MAX_PER_SET: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct SemOp {
    pub num: u16,
    pub op: i16,
    pub nowait: bool,
}

struct SemSet {
    values: Vec<i16>,
    perms: Permissions,
    waiters: WaitQueue,
}

struct SemTable {
    sets: BTreeMap<IpcId, Arc<SpinLock<SemSet>>>,
}

static TABLE: SpinLock<SemTable> = SpinLock::new(SemTable { sets: BTreeMap::new() });

pub fn semget(key: Key, nsems: usize, create: bool, excl: bool, perms: Permissions) -> Result<IpcId, KernelError> {
    if nsems == 0 || nsems > SEM_MAX_PER_SET {
        return Err(KernelError::InvalidArgument);
    }
    let (id, created) = ipc::resolve(key, create, excl)?;
    if created {
        let set = SemSet { values: alloc::vec![0i16; nsems], perms, waiters: WaitQueue::new() };
        TABLE.lock().sets.insert(id, Arc::new(SpinLock::new(set)));
    }
    Ok(id)
}

fn lookup(id: IpcId) -> Result<Arc<SpinLock<SemSet>>, KernelError> {
    TABLE.lock().sets.get(&id).cloned().ok_or(KernelError::NotFound)
}

/// Apply every op in `ops` atomically, blocking and retrying the whole
/// batch if any single op cannot currently be satisfied (unless that op
/// carries `nowait`, in which case the whole call returns `EAGAIN`
/// immediately rather than blocking).
pub fn semop(id: IpcId, ops: &[SemOp]) -> Result<(), KernelError> {
    let set = lookup(id)?;
    loop {
        let mut nowait_blocked = false;
        {
            let mut s = set.lock();
            if ops.iter().any(|op| op.num as usize >= s.values.len()) {
                return Err(KernelError::InvalidArgument);
            }
            if can_apply_all(&s.values, ops) {
                for op in ops {
                    s.values[op.num as usize] += op.op;
                }
                s.waiters.wake_all();
                return Ok(());
            }
            if ops.iter().any(|op| op.nowait) {
                nowait_blocked = true;
            }
        }
        if nowait_blocked {
            return Err(KernelError::WouldBlock);
        }
        if !set.lock().waiters.sleep_interruptible() {
            return Err(KernelError::Interrupted);
        }
    }
}

fn can_apply_all(values: &[i16], ops: &[SemOp]) -> bool {
    let mut scratch: Vec<i16> = values.to_vec();
    for op in ops {
        let idx = op.num as usize;
        if op.op == 0 {
            // "Wait for zero": applicable only if the semaphore is already
            // zero, never an increment/decrement.
            if scratch[idx] != 0 {
                return false;
            }
            continue;
        }
        let next = scratch[idx] as i32 + op.op as i32;
        if next < 0 {
            return false;
        }
        scratch[idx] = next as i16;
    }
    true
}

pub fn semctl_rmid(id: IpcId, key: Key) -> Result<(), KernelError> {
    let mut table = TABLE.lock();
    let set = table.sets.remove(&id).ok_or(KernelError::NotFound)?;
    set.lock().waiters.wake_all();
    drop(table);
    ipc::unregister(key);
    Ok(())
}

pub fn getval(id: IpcId, num: u16) -> Result<i16, KernelError> {
    let set = lookup(id)?;
    let s = set.lock();
    s.values.get(num as usize).copied().ok_or(KernelError::InvalidArgument)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms() -> Permissions {
        Permissions { uid: 0, gid: 0, mode: 0o600 }
    }

    #[test]
    fn atomic_batch_rejects_when_any_op_would_go_negative() {
        let id = semget(Key(0x5eed_0001), 2, true, false, perms()).unwrap();
        let ops = [SemOp { num: 0, op: 1, nowait: true }, SemOp { num: 1, op: -1, nowait: true }];
        // sem 1 starts at 0; decrementing it would go negative, so neither
        // op applies even though sem 0's increment alone would succeed.
        assert!(matches!(semop(id, &ops), Err(KernelError::WouldBlock)));
        assert_eq!(getval(id, 0).unwrap(), 0);
        semctl_rmid(id, Key(0x5eed_0001)).unwrap();
    }

    #[test]
    fn nowait_on_unsatisfiable_op_returns_would_block() {
        let id = semget(Key::IPC_PRIVATE, 1, true, false, perms()).unwrap();
        let ops = [SemOp { num: 0, op: -1, nowait: true }];
        assert!(matches!(semop(id, &ops), Err(KernelError::WouldBlock)));
    }

    #[test]
    fn wait_for_zero_only_applies_when_already_zero() {
        let id = semget(Key::IPC_PRIVATE, 1, true, false, perms()).unwrap();
        semop(id, &[SemOp { num: 0, op: 1, nowait: true }]).unwrap();
        let ops = [SemOp { num: 0, op: 0, nowait: true }];
        assert!(matches!(semop(id, &ops), Err(KernelError::WouldBlock)));
        semop(id, &[SemOp { num: 0, op: -1, nowait: true }]).unwrap();
        assert!(semop(id, &ops).is_ok());
    }

    #[test]
    fn increment_then_decrement_round_trips_to_zero() {
        let id = semget(Key::IPC_PRIVATE, 1, true, false, perms()).unwrap();
        semop(id, &[SemOp { num: 0, op: 1, nowait: true }]).unwrap();
        assert_eq!(getval(id, 0).unwrap(), 1);
        semop(id, &[SemOp { num: 0, op: -1, nowait: true }]).unwrap();
        assert_eq!(getval(id, 0).unwrap(), 0);
    }
}
