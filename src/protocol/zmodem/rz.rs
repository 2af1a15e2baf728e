use std::time::Duration;

use crate::{
    com::Com,
    protocol::{
        display_size, parse_file_info, BoundedBuffer, FileStorageHandler, FileTransferContext, ReceivedFile, TransferSettings,
        TransmissionError,
    },
};

use super::{read_subpacket, Frame, FrameDecoder, FrameType, ABORT_SEQ, DATA_BUFFER_LEN, ZMAXSPLEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RzState {
    AwaitInit,
    AwaitFile,
    ReceivingData,
    Finished,
}

/// ZMODEM receiver session.
///
/// Owns the frame decoder and the file that is currently written. At most one
/// file is open at a time, a new ZFILE closes the previous one.
pub struct Rz {
    settings: TransferSettings,
    state: RzState,
    decoder: FrameDecoder,
    data_buf: BoundedBuffer,
    info_buf: BoundedBuffer,
    file: Option<FileTransferContext>,
    files: Vec<ReceivedFile>,
    retries: u32,
    pub errors: usize,
}

impl Rz {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            settings,
            state: RzState::AwaitInit,
            decoder: FrameDecoder::new(),
            data_buf: BoundedBuffer::new(DATA_BUFFER_LEN),
            info_buf: BoundedBuffer::new(ZMAXSPLEN),
            file: None,
            files: Vec::new(),
            retries: 0,
            errors: 0,
        }
    }

    pub fn state(&self) -> RzState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Runs a complete session and returns the files that were closed after
    /// ZEOF or ZFIN.
    ///
    /// Whatever ends the session, no file is left open afterwards.
    pub fn recv(
        &mut self,
        com: &mut dyn Com,
        storage: &mut dyn FileStorageHandler,
    ) -> Result<Vec<ReceivedFile>, TransmissionError> {
        self.state = RzState::AwaitInit;
        self.retries = 0;
        self.decoder.reset();

        if let Err(err) = self.run(com, storage) {
            log::error!("zmodem receive failed: {err}");
            if let Some(file) = self.file.take() {
                if let Err(close_err) = file.close() {
                    log::error!("error closing file: {close_err}");
                }
            }
            if matches!(err, TransmissionError::Cancelled | TransmissionError::TooManyRetries(_))
                && self.state != RzState::Finished
            {
                if let Err(send_err) = com.send(&ABORT_SEQ) {
                    log::error!("error sending abort sequence: {send_err}");
                }
            }
            self.state = RzState::Finished;
            return Err(err);
        }
        Ok(std::mem::take(&mut self.files))
    }

    fn run(&mut self, com: &mut dyn Com, storage: &mut dyn FileStorageHandler) -> Result<(), TransmissionError> {
        send_zrinit(com)?;
        while self.state != RzState::Finished {
            let frame = match self.decoder.read_frame(com, self.settings.frame_timeout) {
                Ok(frame) => frame,
                Err(TransmissionError::Timeout(timeout)) => {
                    self.retry_after_timeout(com, timeout)?;
                    continue;
                }
                Err(err) if err.is_recoverable() => {
                    self.errors += 1;
                    log::warn!("{:?}: {err}", err.kind());
                    continue;
                }
                Err(err) => return Err(err),
            };
            self.retries = 0;
            self.decoder.reset();
            self.dispatch(com, storage, &frame)?;
        }
        Ok(())
    }

    fn retry_after_timeout(&mut self, com: &mut dyn Com, timeout: Duration) -> Result<(), TransmissionError> {
        self.retries += 1;
        if self.retries >= self.settings.max_retries {
            return Err(TransmissionError::TooManyRetries(self.retries));
        }
        log::warn!(
            "no header within {timeout:?}, retry {}/{}",
            self.retries,
            self.settings.max_retries
        );
        match &self.file {
            Some(file) => Frame::from_number(FrameType::RPos, file.bytes_received as u32).write(com)?,
            None => send_zrinit(com)?,
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        com: &mut dyn Com,
        storage: &mut dyn FileStorageHandler,
        frame: &Frame,
    ) -> Result<(), TransmissionError> {
        match frame.frame_type {
            FrameType::RQInit => {
                send_zrinit(com)?;
                self.state = RzState::AwaitFile;
            }
            FrameType::SInit => match read_subpacket(com, &mut self.info_buf, self.settings.subpacket_timeout) {
                Ok(_) => {
                    Frame::empty(FrameType::Ack).write(com)?;
                    self.state = RzState::AwaitFile;
                }
                Err(err) if err.is_recoverable() => {
                    self.errors += 1;
                    log::warn!("bad ZSINIT subpacket: {err}");
                    Frame::empty(FrameType::Nak).write(com)?;
                }
                Err(err) => return Err(err),
            },
            FrameType::File => self.handle_zfile(com, storage)?,
            FrameType::Data => self.handle_zdata(com, frame)?,
            FrameType::Eof => {
                let Some(file) = &self.file else {
                    log::debug!("ZEOF without open file");
                    return send_zrinit(com);
                };
                if frame.number() as u64 != file.bytes_received {
                    log::warn!(
                        "ignoring stale ZEOF at {} (received {})",
                        frame.number(),
                        file.bytes_received
                    );
                    return Ok(());
                }
                self.close_file()?;
                send_zrinit(com)?;
                self.state = RzState::AwaitFile;
            }
            FrameType::Fin => {
                self.close_file()?;
                Frame::empty(FrameType::Fin).write(com)?;
                for _ in 0..2 {
                    if let Err(err) = com.read_u8(self.settings.drain_timeout) {
                        log::debug!("no over and out: {err}");
                        break;
                    }
                }
                log::info!("transfer complete, {} file(s) received", self.files.len());
                self.state = RzState::Finished;
            }
            FrameType::FreeCnt => {
                // 0 means unlimited
                Frame::from_number(FrameType::Ack, 0).write(com)?;
            }
            FrameType::Abort | FrameType::FErr => {
                log::error!("sender aborted the transfer with {frame}");
                Frame::empty(FrameType::Fin).write(com)?;
                self.state = RzState::Finished;
                return Err(TransmissionError::Cancelled);
            }
            _ => {
                log::warn!("ignoring unexpected header {frame}");
            }
        }
        Ok(())
    }

    fn handle_zfile(&mut self, com: &mut dyn Com, storage: &mut dyn FileStorageHandler) -> Result<(), TransmissionError> {
        if let Err(err) = read_subpacket(com, &mut self.info_buf, self.settings.subpacket_timeout) {
            if !err.is_recoverable() {
                return Err(err);
            }
            self.errors += 1;
            log::warn!("bad ZFILE subpacket: {err}");
            Frame::empty(FrameType::Nak).write(com)?;
            return Ok(());
        }
        let (file_name, file_size) = parse_file_info(&self.info_buf);
        self.close_file()?;

        match FileTransferContext::open(storage, &file_name, file_size) {
            Ok(file) => {
                log::info!("receiving '{file_name}' ({} bytes)", display_size(file_size));
                self.file = Some(file);
                self.state = RzState::ReceivingData;
                Frame::from_number(FrameType::RPos, 0).write(com)?;
            }
            Err(err) => {
                log::warn!("skipping '{file_name}': {err}");
                self.state = RzState::AwaitFile;
                Frame::empty(FrameType::Skip).write(com)?;
            }
        }
        Ok(())
    }

    fn handle_zdata(&mut self, com: &mut dyn Com, frame: &Frame) -> Result<(), TransmissionError> {
        let Some(file) = self.file.as_mut() else {
            // the sender starts over with ZFILE, its subpackets are skipped while hunting for ZPAD
            self.errors += 1;
            log::warn!("{}", TransmissionError::ZDataBeforeZFile);
            return send_zrinit(com);
        };
        let offset = frame.number() as u64;
        if offset > file.bytes_received {
            log::warn!("ZDATA at {offset} but only {} bytes received", file.bytes_received);
            Frame::from_number(FrameType::RPos, file.bytes_received as u32).write(com)?;
            return Ok(());
        }
        file.seek(offset)?;

        loop {
            match read_subpacket(com, &mut self.data_buf, self.settings.subpacket_timeout) {
                Ok(frame_end) => {
                    file.write(&self.data_buf)?;
                    if frame_end.zack_requested() {
                        Frame::from_number(FrameType::Ack, file.bytes_received as u32).write(com)?;
                    }
                    if frame_end.frame_ends() {
                        return Ok(());
                    }
                }
                Err(err) if err.is_recoverable() => {
                    self.errors += 1;
                    log::warn!("subpacket error: {err}, resume at {}", file.bytes_received);
                    Frame::from_number(FrameType::RPos, file.bytes_received as u32).write(com)?;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn close_file(&mut self) -> Result<(), TransmissionError> {
        if let Some(file) = self.file.take() {
            let received = file.close()?;
            log::info!("'{}' done, {} bytes", received.file_name, received.bytes_received);
            self.files.push(received);
        }
        Ok(())
    }
}

/// ZRINIT with all capability flags cleared.
fn send_zrinit(com: &mut dyn Com) -> Result<(), TransmissionError> {
    Frame::empty(FrameType::RInit).write(com)?;
    Ok(())
}
