//! Fixed-capacity byte buffers moved between non-blocking descriptors.
//!
//! The buffers never touch descriptors directly: callers pass the read or
//! write operation as a closure. A short write keeps the unwritten tail at
//! the front of the buffer, and `EAGAIN` leaves everything in place.

use std::io;

/// Capacity of each side's buffer.
pub const BUFFER_SIZE: usize = 4096;

/// Capacity of the out-of-band buffer used for injected control bytes.
pub const OOB_BUFFER_SIZE: usize = 32;

/// Result of one transfer attempt.
#[derive(Debug)]
pub(crate) enum Transfer {
    /// Bytes were moved.
    Moved(usize),
    /// Nothing to do: the buffer was full (fill) or empty (drain).
    Idle,
    /// The descriptor is not ready.
    WouldBlock,
    /// End of file.
    Closed,
    /// A permanent error.
    Failed(io::Error),
}

#[derive(Debug)]
pub(crate) struct RelayBuffer {
    data: Box<[u8]>,
    used: usize,
}

impl RelayBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.used
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.used >= self.data.len()
    }

    pub(crate) fn clear(&mut self) {
        self.used = 0;
    }

    pub(crate) fn pending(&self) -> &[u8] {
        self.data.get(..self.used).unwrap_or_default()
    }

    /// Appends as much of `bytes` as fits and returns how many were taken.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> usize {
        let Some(spare) = self.data.get_mut(self.used..) else {
            return 0;
        };
        let taken = bytes.len().min(spare.len());
        if let (Some(dest), Some(src)) = (spare.get_mut(..taken), bytes.get(..taken)) {
            dest.copy_from_slice(src);
            self.used += taken;
            taken
        } else {
            0
        }
    }

    /// Performs one read into the free space.
    pub(crate) fn fill(&mut self, mut read: impl FnMut(&mut [u8]) -> io::Result<usize>) -> Transfer {
        let Some(spare) = self.data.get_mut(self.used..) else {
            return Transfer::Idle;
        };
        if spare.is_empty() {
            return Transfer::Idle;
        }
        let capacity = spare.len();
        loop {
            match read(&mut *spare) {
                Ok(0) => return Transfer::Closed,
                Ok(count) => {
                    let count = count.min(capacity);
                    self.used += count;
                    return Transfer::Moved(count);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Transfer::WouldBlock;
                }
                Err(error) => return Transfer::Failed(error),
            }
        }
    }

    /// Writes until the buffer is empty or the writer stops accepting.
    pub(crate) fn drain(&mut self, mut write: impl FnMut(&[u8]) -> io::Result<usize>) -> Transfer {
        if self.is_empty() {
            return Transfer::Idle;
        }
        let mut total = 0;
        while !self.is_empty() {
            match write(self.pending()) {
                Ok(0) => return Transfer::WouldBlock,
                Ok(count) => {
                    self.consume(count);
                    total += count;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Transfer::WouldBlock;
                }
                Err(error) => return Transfer::Failed(error),
            }
        }
        Transfer::Moved(total)
    }

    fn consume(&mut self, count: usize) {
        let count = count.min(self.used);
        self.data.copy_within(count..self.used, 0);
        self.used -= count;
    }
}

/// Drains `priority` completely before touching `regular`.
pub(crate) fn drain_prioritised(
    priority: &mut RelayBuffer,
    regular: &mut RelayBuffer,
    mut write: impl FnMut(&[u8]) -> io::Result<usize>,
) -> Transfer {
    match priority.drain(&mut write) {
        Transfer::Idle | Transfer::Moved(_) => {}
        blocked => return blocked,
    }
    regular.drain(write)
}
