use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::mpsc,
    thread,
    time::Duration,
};

use super::{Com, ComError, ComResult};

/// What the stdin reader thread hands over.
#[derive(Debug)]
enum ReadData {
    Data(Vec<u8>),
    Error(io::Error),
}

/// stdin/stdout as transport.
///
/// stdin is drained by a background thread, so a read can wait on the
/// channel with a real deadline instead of blocking inside `read(2)`.
pub struct StdioCom {
    rx: mpsc::Receiver<ReadData>,
    buf: VecDeque<u8>,
    eof: bool,
}

impl StdioCom {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<ReadData>();
        thread::spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0; 4096];
            loop {
                let msg = match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(size) => ReadData::Data(buf[..size].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => ReadData::Error(e),
                };
                let is_err = matches!(msg, ReadData::Error(_));
                if tx.send(msg).is_err() || is_err {
                    break;
                }
            }
        });
        Self {
            rx,
            buf: VecDeque::new(),
            eof: false,
        }
    }

    fn accept(&mut self, data: ReadData) -> ComResult<()> {
        match data {
            ReadData::Data(v) => {
                self.buf.extend(v);
                Ok(())
            }
            ReadData::Error(err) => Err(ComError::Io(err)),
        }
    }
}

impl Default for StdioCom {
    fn default() -> Self {
        Self::new()
    }
}

impl Com for StdioCom {
    fn name(&self) -> &'static str {
        "Stdio"
    }

    fn read_u8(&mut self, timeout: Duration) -> ComResult<u8> {
        while self.buf.is_empty() {
            if self.eof {
                return Err(ComError::Eof);
            }
            match self.rx.recv_timeout(timeout) {
                Ok(data) => self.accept(data)?,
                Err(mpsc::RecvTimeoutError::Timeout) => return Err(ComError::Timeout(timeout)),
                Err(mpsc::RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
        Ok(self.buf.pop_front().unwrap_or_default())
    }

    fn send(&mut self, buf: &[u8]) -> ComResult<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(buf)?;
        stdout.flush()?;
        Ok(())
    }

    fn flush_input(&mut self) -> ComResult<()> {
        let mut discarded = self.buf.len();
        self.buf.clear();
        loop {
            match self.rx.try_recv() {
                Ok(ReadData::Data(v)) => discarded += v.len(),
                Ok(ReadData::Error(err)) => return Err(ComError::Io(err)),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
        if discarded > 0 {
            log::debug!("discarded {discarded} pending bytes");
        }
        Ok(())
    }
}
