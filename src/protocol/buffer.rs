use std::ops::Deref;

use super::TransmissionError;

/// Byte buffer with a hard capacity, pushing past it is an error instead of
/// a silent reallocation.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, b: u8) -> Result<(), TransmissionError> {
        if self.data.len() >= self.capacity {
            return Err(TransmissionError::BufferOverflow(self.capacity));
        }
        self.data.push(b);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }
}

impl Deref for BoundedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}
