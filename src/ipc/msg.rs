//! System V message queues. FIFO within a type class; `msgrcv`'s type
//! filter follows the usual three-way contract: `0` = any, `>0` = exact
//! match, `<0` = smallest type `<= |type|`.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::ipc::{self, IpcId, Key, Permissions};
use crate::kerror::KernelError;
use crate::sched::wait_queue::WaitQueue;
use crate::sync::spinlock::SpinLock;

pub const MSG_QUEUE_CAPACITY: usize = 64;

pub struct Message {
    pub mtype: i64,
    pub data: Vec<u8>,
}

struct Queue {
    messages: VecDeque<Message>,
    perms: Permissions,
    readers: WaitQueue,
    writers: WaitQueue,
}

struct MsgTable {
    queues: BTreeMap<IpcId, Arc<SpinLock<Queue>>>,
}

static TABLE: SpinLock<MsgTable> = SpinLock::new(MsgTable { queues: BTreeMap::new() });

pub fn msgget(key: Key, create: bool, excl: bool, perms: Permissions) -> Result<IpcId, KernelError> {
    let (id, created) = ipc::resolve(key, create, excl)?;
    if created {
        let q = Queue { messages: VecDeque::new(), perms, readers: WaitQueue::new(), writers: WaitQueue::new() };
        TABLE.lock().queues.insert(id, Arc::new(SpinLock::new(q)));
    }
    Ok(id)
}

fn lookup(id: IpcId) -> Result<Arc<SpinLock<Queue>>, KernelError> {
    TABLE.lock().queues.get(&id).cloned().ok_or(KernelError::NotFound)
}

pub fn msgsnd(id: IpcId, mtype: i64, data: Vec<u8>, nowait: bool) -> Result<(), KernelError> {
    if mtype <= 0 {
        return Err(KernelError::InvalidArgument);
    }
    let q = lookup(id)?;
    loop {
        {
            let mut locked = q.lock();
            if locked.messages.len() < MSG_QUEUE_CAPACITY {
                locked.messages.push_back(Message { mtype, data });
                locked.readers.wake_all();
                return Ok(());
            }
        }
        if nowait {
            return Err(KernelError::WouldBlock);
        }
        if !q.lock().writers.sleep_interruptible() {
            return Err(KernelError::Interrupted);
        }
    }
}

fn find_match(messages: &VecDeque<Message>, type_filter: i64) -> Option<usize> {
    if type_filter == 0 {
        return if messages.is_empty() { None } else { Some(0) };
    }
    if type_filter > 0 {
        return messages.iter().position(|m| m.mtype == type_filter);
    }
    let limit = -type_filter;
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.mtype <= limit)
        .min_by_key(|(_, m)| m.mtype)
        .map(|(i, _)| i)
}

pub fn msgrcv(id: IpcId, type_filter: i64, nowait: bool) -> Result<Message, KernelError> {
    let q = lookup(id)?;
    loop {
        {
            let mut locked = q.lock();
            if let Some(idx) = find_match(&locked.messages, type_filter) {
                let msg = locked.messages.remove(idx).unwrap();
                locked.writers.wake_all();
                return Ok(msg);
            }
        }
        if nowait {
            return Err(KernelError::WouldBlock); // ENOMSG at the syscall layer
        }
        if !q.lock().readers.sleep_interruptible() {
            return Err(KernelError::Interrupted);
        }
    }
}

pub fn msgctl_rmid(id: IpcId, key: Key) -> Result<(), KernelError> {
    let mut table = TABLE.lock();
    let q = table.queues.remove(&id).ok_or(KernelError::NotFound)?;
    {
        let locked = q.lock();
        locked.readers.wake_all();
        locked.writers.wake_all();
    }
    drop(table);
    ipc::unregister(key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms() -> Permissions {
        Permissions { uid: 0, gid: 0, mode: 0o600 }
    }

    #[test]
    fn fifo_within_a_type_class() {
        let id = msgget(Key::IPC_PRIVATE, true, false, perms()).unwrap();
        msgsnd(id, 5, alloc::vec![1], true).unwrap();
        msgsnd(id, 5, alloc::vec![2], true).unwrap();
        let first = msgrcv(id, 5, true).unwrap();
        assert_eq!(first.data, alloc::vec![1]);
    }

    #[test]
    fn negative_type_picks_smallest_type_at_or_below_magnitude() {
        let id = msgget(Key::IPC_PRIVATE, true, false, perms()).unwrap();
        msgsnd(id, 7, alloc::vec![7], true).unwrap();
        msgsnd(id, 3, alloc::vec![3], true).unwrap();
        let got = msgrcv(id, -7, true).unwrap();
        assert_eq!(got.mtype, 3);
    }

    #[test]
    fn recv_on_empty_queue_with_nowait_is_would_block() {
        let id = msgget(Key::IPC_PRIVATE, true, false, perms()).unwrap();
        assert!(matches!(msgrcv(id, 0, true), Err(KernelError::WouldBlock)));
    }

    #[test]
    fn zero_type_matches_anything_fifo_order() {
        let id = msgget(Key::IPC_PRIVATE, true, false, perms()).unwrap();
        msgsnd(id, 9, alloc::vec![9], true).unwrap();
        msgsnd(id, 1, alloc::vec![1], true).unwrap();
        let got = msgrcv(id, 0, true).unwrap();
        assert_eq!(got.mtype, 9);
    }
}
