use std::{io, time::Duration};

pub mod buffer;
pub use buffer::*;

pub mod crc;

pub mod error;
pub use error::*;

pub mod file_storage_handler;
pub use file_storage_handler::*;

pub mod xymodem;
pub use xymodem::*;

pub mod zmodem;
pub use zmodem::*;

pub const MAX_RETRIES: u32 = 20;

/// Timeouts and retry budget of a receive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    /// Wait for the next header or packet.
    pub frame_timeout: Duration,
    /// Wait for the next byte inside a subpacket.
    pub subpacket_timeout: Duration,
    /// Wait for the trailing "OO" after ZFIN.
    pub drain_timeout: Duration,
    pub max_retries: u32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(10),
            subpacket_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
            max_retries: MAX_RETRIES,
        }
    }
}

/// A file that was received completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_name: String,
    pub file_size: Option<u64>,
    pub bytes_received: u64,
}

/// The file currently being received and its progress.
///
/// Owns the only handle to the destination file. Dropping the context
/// without calling [`FileTransferContext::close`] discards the handle too.
pub struct FileTransferContext {
    sink: Box<dyn FileSink>,
    pub file_name: String,
    pub file_size: Option<u64>,
    position: u64,
    pub bytes_received: u64,
}

impl FileTransferContext {
    pub fn open(storage: &mut dyn FileStorageHandler, file_name: &str, file_size: Option<u64>) -> io::Result<Self> {
        let sink = storage.create_truncate(file_name)?;
        Ok(Self {
            sink,
            file_name: file_name.to_string(),
            file_size,
            position: 0,
            bytes_received: 0,
        })
    }

    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.sink.seek(offset)?;
        self.position = offset;
        Ok(())
    }

    /// Writes verified data at the current position, `bytes_received`
    /// follows the end of the written range.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.sink.write(data)?;
        self.position += data.len() as u64;
        self.bytes_received = self.position;
        Ok(())
    }

    pub fn close(self) -> io::Result<ReceivedFile> {
        self.sink.close()?;
        Ok(ReceivedFile {
            file_name: self.file_name,
            file_size: self.file_size,
            bytes_received: self.bytes_received,
        })
    }
}

/// Interprets a metadata block: the file name up to the first NUL, followed
/// by the ASCII decimal size (anything after the first non digit is ignored).
pub fn parse_file_info(block: &[u8]) -> (String, Option<u64>) {
    let name_end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
    let file_name = String::from_utf8_lossy(&block[..name_end]).to_string();

    let rest = block.get(name_end + 1..).unwrap_or_default();
    let digits: &[u8] = match rest.iter().position(|b| !b.is_ascii_digit()) {
        Some(end) => &rest[..end],
        None => rest,
    };
    let file_size = std::str::from_utf8(digits).ok().and_then(|s| s.parse::<u64>().ok());
    (file_name, file_size)
}

pub fn display_size(file_size: Option<u64>) -> String {
    file_size.map_or_else(|| "unknown".to_string(), |size| size.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_info() {
        assert_eq!(("foo.bar".to_string(), Some(1234)), parse_file_info(b"foo.bar\x001234 14467750624 100644\0\0\0"));
        assert_eq!(("foo.bar".to_string(), None), parse_file_info(b"foo.bar\0\0\0"));
        assert_eq!(("foo.bar".to_string(), None), parse_file_info(b"foo.bar"));
        assert_eq!((String::new(), None), parse_file_info(&[0; 128]));
    }

    #[test]
    fn test_context_tracks_written_range() {
        let mut storage = TestStorageHandler::new();
        let mut ctx = FileTransferContext::open(&mut storage, "a", Some(8)).unwrap();
        ctx.write(b"abcd").unwrap();
        assert_eq!(4, ctx.bytes_received);
        ctx.seek(2).unwrap();
        ctx.write(b"CDef").unwrap();
        assert_eq!(6, ctx.bytes_received);
        let file = ctx.close().unwrap();
        assert_eq!(6, file.bytes_received);
        assert_eq!(Some(b"abCDef".to_vec()), storage.get("a"));
        assert_eq!(1, storage.closed.get());
    }
}
