use std::{io, time::Duration};

use thiserror::Error;

pub mod serial_port;
pub use serial_port::*;

pub mod stdio;
pub use stdio::*;

#[cfg(test)]
pub mod test_com;
#[cfg(test)]
pub use test_com::*;

#[derive(Debug, Error)]
pub enum ComError {
    #[error("no data within {0:?}")]
    Timeout(Duration),
    #[error("end of stream")]
    Eof,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

pub type ComResult<T> = Result<T, ComError>;

/// Full-duplex byte stream the receivers talk over.
///
/// Reads are byte oriented and bounded by an explicit timeout, a timeout is
/// reported as [`ComError::Timeout`] and never confused with end of stream.
pub trait Com {
    fn name(&self) -> &'static str;

    fn read_u8(&mut self, timeout: Duration) -> ComResult<u8>;

    /// Reads exactly `len` bytes, each byte under `timeout`.
    fn read_exact(&mut self, timeout: Duration, len: usize) -> ComResult<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            data.push(self.read_u8(timeout)?);
        }
        Ok(data)
    }

    fn send(&mut self, buf: &[u8]) -> ComResult<()>;

    /// Drops everything that already arrived but wasn't read yet.
    fn flush_input(&mut self) -> ComResult<()>;
}
