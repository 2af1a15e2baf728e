use std::{
    fs::File,
    io::{self, BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// An open destination file.
pub trait FileSink {
    fn seek(&mut self, offset: u64) -> io::Result<()>;
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Creates destination files for incoming transfers.
pub trait FileStorageHandler {
    /// Creates `file_name` (or truncates it) and hands out the only handle to it.
    fn create_truncate(&mut self, file_name: &str) -> io::Result<Box<dyn FileSink>>;
}

/// Stores received files below a fixed directory.
///
/// Names coming from the sender are reduced to their last path component so
/// a transfer can't write outside of `output_dir`.
pub struct DiskStorageHandler {
    output_dir: PathBuf,
}

impl DiskStorageHandler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn resolve(&self, file_name: &str) -> io::Result<PathBuf> {
        match Path::new(file_name).file_name() {
            Some(name) => Ok(self.output_dir.join(name)),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name '{file_name}'"),
            )),
        }
    }
}

impl FileStorageHandler for DiskStorageHandler {
    fn create_truncate(&mut self, file_name: &str) -> io::Result<Box<dyn FileSink>> {
        let path = self.resolve(file_name)?;
        let file = File::create(&path)?;
        log::debug!("created {}", path.display());
        Ok(Box::new(DiskFile {
            writer: BufWriter::new(file),
        }))
    }
}

struct DiskFile {
    writer: BufWriter<File>,
}

impl FileSink for DiskFile {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.writer.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let file = self.writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()
    }
}

#[cfg(test)]
pub use test_storage::*;

#[cfg(test)]
mod test_storage {
    use std::{
        cell::{Cell, RefCell},
        collections::HashMap,
        io,
        rc::Rc,
    };

    use super::{FileSink, FileStorageHandler};

    /// Keeps received files in memory and counts how often they get closed.
    #[derive(Clone, Default)]
    pub struct TestStorageHandler {
        pub files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
        pub closed: Rc<Cell<usize>>,
        pub fail_open: bool,
    }

    impl TestStorageHandler {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
            self.files.borrow().get(file_name).cloned()
        }
    }

    impl FileStorageHandler for TestStorageHandler {
        fn create_truncate(&mut self, file_name: &str) -> io::Result<Box<dyn FileSink>> {
            if self.fail_open {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read only"));
            }
            self.files.borrow_mut().insert(file_name.to_string(), Vec::new());
            Ok(Box::new(TestFile {
                file_name: file_name.to_string(),
                pos: 0,
                files: self.files.clone(),
                closed: self.closed.clone(),
            }))
        }
    }

    struct TestFile {
        file_name: String,
        pos: usize,
        files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
        closed: Rc<Cell<usize>>,
    }

    impl FileSink for TestFile {
        fn seek(&mut self, offset: u64) -> io::Result<()> {
            self.pos = offset as usize;
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            let mut files = self.files.borrow_mut();
            let file = files.entry(self.file_name.clone()).or_default();
            let end = self.pos + data.len();
            if file.len() < end {
                file.resize(end, 0);
            }
            file[self.pos..end].copy_from_slice(data);
            self.pos = end;
            Ok(())
        }

        fn close(self: Box<Self>) -> io::Result<()> {
            self.closed.set(self.closed.get() + 1);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_file_seek_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = DiskStorageHandler::new(dir.path());
        let mut file = storage.create_truncate("out.bin").unwrap();
        file.write(b"hello world").unwrap();
        file.seek(6).unwrap();
        file.write(b"there").unwrap();
        file.close().unwrap();
        assert_eq!(b"hello there".to_vec(), std::fs::read(dir.path().join("out.bin")).unwrap());
    }

    #[test]
    fn test_disk_file_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), b"previous content").unwrap();
        let mut storage = DiskStorageHandler::new(dir.path());
        let mut file = storage.create_truncate("old.txt").unwrap();
        file.write(b"new").unwrap();
        file.close().unwrap();
        assert_eq!(b"new".to_vec(), std::fs::read(dir.path().join("old.txt")).unwrap());
    }

    #[test]
    fn test_sender_paths_are_stripped() {
        let storage = DiskStorageHandler::new("/tmp/in");
        assert_eq!(PathBuf::from("/tmp/in/passwd"), storage.resolve("../../etc/passwd").unwrap());
        assert_eq!(PathBuf::from("/tmp/in/a.txt"), storage.resolve("dir/a.txt").unwrap());
        assert!(storage.resolve("..").is_err());
        assert!(storage.resolve("").is_err());
    }
}
