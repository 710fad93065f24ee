//! Anonymous pipes: a fixed-size ring buffer plus reader/writer wait
//! queues, so blocking reads/writes go through the same sleep/wake
//! primitive as everything else instead of a hand-rolled retry loop.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::sched::wait_queue::WaitQueue;

const PIPE_BUFFER_SIZE: usize = 4096;

pub struct PipeInner {
    buffer: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    readers: usize,
    writers: usize,
    pub read_waiters: WaitQueue,
    pub write_waiters: WaitQueue,
}

impl PipeInner {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(PipeInner {
            buffer: vec![0; PIPE_BUFFER_SIZE],
            read_pos: 0,
            write_pos: 0,
            readers: 0,
            writers: 0,
            read_waiters: WaitQueue::new(),
            write_waiters: WaitQueue::new(),
        }))
    }

    pub fn add_reader(&mut self) {
        self.readers += 1;
    }

    pub fn add_writer(&mut self) {
        self.writers += 1;
    }

    pub fn drop_reader(&mut self) {
        if self.readers > 0 {
            self.readers -= 1;
        }
        self.write_waiters.wake_all(); // writers blocked on a full pipe need to observe EOF-on-write
    }

    pub fn drop_writer(&mut self) {
        if self.writers > 0 {
            self.writers -= 1;
        }
        self.read_waiters.wake_all(); // readers blocked on an empty pipe need to observe EOF
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    pub fn is_full(&self) -> bool {
        (self.write_pos + 1) % PIPE_BUFFER_SIZE == self.read_pos
    }

    pub fn active_writers(&self) -> usize {
        self.writers
    }

    pub fn active_readers(&self) -> usize {
        self.readers
    }

    /// Read up to `buf.len()` bytes. Returns the number of bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut bytes_read = 0;
        while bytes_read < buf.len() && !self.is_empty() {
            buf[bytes_read] = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % PIPE_BUFFER_SIZE;
            bytes_read += 1;
        }
        if bytes_read > 0 {
            self.write_waiters.wake_all();
        }
        bytes_read
    }

    /// Write up to `buf.len()` bytes. Returns the number of bytes written.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let mut bytes_written = 0;
        while bytes_written < buf.len() && !self.is_full() {
            self.buffer[self.write_pos] = buf[bytes_written];
            self.write_pos = (self.write_pos + 1) % PIPE_BUFFER_SIZE;
            bytes_written += 1;
        }
        if bytes_written > 0 {
            self.read_waiters.wake_all();
        }
        bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let pipe = PipeInner::new();
        {
            let mut p = pipe.lock();
            assert_eq!(p.write(b"hello"), 5);
        }
        let mut buf = [0u8; 5];
        assert_eq!(pipe.lock().read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn reader_and_writer_refcounts_track_independently() {
        let pipe = PipeInner::new();
        let mut p = pipe.lock();
        p.add_reader();
        p.add_writer();
        p.add_writer();
        assert_eq!(p.active_readers(), 1);
        assert_eq!(p.active_writers(), 2);
        p.drop_writer();
        assert_eq!(p.active_writers(), 1);
    }
}
