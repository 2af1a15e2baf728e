use crate::{
    com::Com,
    protocol::{
        display_size, parse_file_info, FileStorageHandler, FileTransferContext, ReceivedFile, TransferSettings, TransmissionError,
    },
};

use super::{
    constants::{ACK, CAN, CRC_REQUEST, NAK},
    read_packet, Packet, YmodemPacket,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RyState {
    Idle,
    Metadata,
    Data,
    Eot,
    End,
}

/// YMODEM batch receiver.
pub struct Ry {
    settings: TransferSettings,
    state: RyState,
    retries: u32,
    file: Option<FileTransferContext>,
    files: Vec<ReceivedFile>,
    expected_id: u8,
    eot_confirmed: bool,
    pub errors: usize,
}

impl Ry {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            settings,
            state: RyState::Idle,
            retries: 0,
            file: None,
            files: Vec::new(),
            expected_id: 1,
            eot_confirmed: false,
            errors: 0,
        }
    }

    pub fn state(&self) -> RyState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Runs the session until the sender ends the batch.
    ///
    /// Whatever ends the session, no file is left open afterwards.
    pub fn recv(
        &mut self,
        com: &mut dyn Com,
        storage: &mut dyn FileStorageHandler,
    ) -> Result<Vec<ReceivedFile>, TransmissionError> {
        self.state = RyState::Idle;
        self.retries = 0;
        self.expected_id = 1;
        self.eot_confirmed = false;
        loop {
            match self.step(com, storage) {
                Ok(true) => {}
                Ok(false) => return Ok(std::mem::take(&mut self.files)),
                Err(err) => {
                    log::error!("ymodem receive failed: {err}");
                    if let Some(file) = self.file.take() {
                        if let Err(close_err) = file.close() {
                            log::error!("error closing file: {close_err}");
                        }
                    }
                    if matches!(err, TransmissionError::TooManyRetries(_)) {
                        if let Err(send_err) = com.send(&[CAN, CAN]) {
                            log::error!("error sending cancel: {send_err}");
                        }
                    }
                    self.state = RyState::End;
                    return Err(err);
                }
            }
        }
    }

    /// Performs one state transition, returns `false` once the session ended.
    pub fn step(&mut self, com: &mut dyn Com, storage: &mut dyn FileStorageHandler) -> Result<bool, TransmissionError> {
        match self.state {
            RyState::Idle => {
                com.send(&[CRC_REQUEST])?;
                self.state = RyState::Metadata;
            }

            RyState::Metadata => match read_packet(com, self.settings.frame_timeout) {
                Ok(Packet::Data(packet)) if packet.id == 0 => {
                    self.retries = 0;
                    self.start_file(com, storage, &packet)?;
                }
                Ok(Packet::Data(packet)) => {
                    let err = TransmissionError::ProtocolViolation(format!("expected header packet, got #{}", packet.id));
                    self.retry(com, err)?;
                    self.state = RyState::Idle;
                }
                Ok(Packet::Eot) => {
                    let err = TransmissionError::ProtocolViolation("EOT before header packet".to_string());
                    self.retry(com, err)?;
                    self.state = RyState::Idle;
                }
                Err(err) if err.is_recoverable() => {
                    self.retry(com, err)?;
                    self.state = RyState::Idle;
                }
                Err(err) => return Err(err),
            },

            RyState::Data => match read_packet(com, self.settings.frame_timeout) {
                Ok(Packet::Eot) => {
                    com.send(&[NAK])?;
                    self.eot_confirmed = false;
                    self.state = RyState::Eot;
                }
                Ok(Packet::Data(packet)) if packet.id == self.expected_id => {
                    self.write_packet(&packet)?;
                    self.expected_id = self.expected_id.wrapping_add(1);
                    self.retries = 0;
                    com.send(&[ACK])?;
                }
                Ok(Packet::Data(packet)) if packet.id == 0 && self.expected_id == 1 => {
                    // our reply to the header packet got lost
                    log::debug!("header packet repeated");
                    com.send(&[ACK, CRC_REQUEST])?;
                }
                Ok(Packet::Data(packet)) if packet.id == self.expected_id.wrapping_sub(1) => {
                    log::debug!("packet #{} repeated", packet.id);
                    com.send(&[ACK])?;
                }
                Ok(Packet::Data(packet)) => {
                    let err = TransmissionError::ProtocolViolation(format!(
                        "expected packet #{}, got #{}",
                        self.expected_id, packet.id
                    ));
                    self.nak(com, err)?;
                }
                Err(err) if err.is_recoverable() => self.nak(com, err)?,
                Err(err) => return Err(err),
            },

            RyState::Eot if !self.eot_confirmed => match read_packet(com, self.settings.frame_timeout) {
                Ok(Packet::Eot) => {
                    com.send(&[ACK, CRC_REQUEST])?;
                    self.eot_confirmed = true;
                }
                Ok(Packet::Data(packet)) => {
                    let err = TransmissionError::ProtocolViolation(format!("expected EOT, got packet #{}", packet.id));
                    self.nak(com, err)?;
                }
                Err(err) if err.is_recoverable() => self.nak(com, err)?,
                Err(err) => return Err(err),
            },

            RyState::Eot => match read_packet(com, self.settings.frame_timeout) {
                Ok(Packet::Data(packet)) if packet.id == 0 && packet.data.first().map_or(true, |&b| b == 0) => {
                    self.retries = 0;
                    self.start_file(com, storage, &packet)?;
                }
                Ok(Packet::Data(packet)) if packet.id == 0 => {
                    let err = TransmissionError::ProtocolViolation("one file per session, expected end of batch".to_string());
                    self.nak(com, err)?;
                }
                Ok(Packet::Eot) => {
                    // our ACK got lost
                    com.send(&[ACK, CRC_REQUEST])?;
                }
                Ok(Packet::Data(packet)) => {
                    let err = TransmissionError::ProtocolViolation(format!("expected end of batch, got #{}", packet.id));
                    self.nak(com, err)?;
                }
                Err(err) if err.is_recoverable() => self.nak(com, err)?,
                Err(err) => return Err(err),
            },

            RyState::End => {
                self.close_file()?;
                log::info!("transfer complete, {} file(s) received", self.files.len());
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Handles packet 0: either the next file of the batch or, with an empty
    /// name, the end of the batch.
    fn start_file(
        &mut self,
        com: &mut dyn Com,
        storage: &mut dyn FileStorageHandler,
        packet: &YmodemPacket,
    ) -> Result<(), TransmissionError> {
        let (file_name, file_size) = parse_file_info(&packet.data);
        self.close_file()?;
        if file_name.is_empty() {
            com.send(&[ACK])?;
            self.state = RyState::End;
            return Ok(());
        }

        let file = FileTransferContext::open(storage, &file_name, file_size.filter(|&size| size > 0))?;
        log::info!("receiving '{file_name}' ({} bytes)", display_size(file_size));
        self.file = Some(file);
        self.expected_id = 1;
        com.send(&[ACK, CRC_REQUEST])?;
        self.state = RyState::Data;
        Ok(())
    }

    fn write_packet(&mut self, packet: &YmodemPacket) -> Result<(), TransmissionError> {
        let Some(file) = self.file.as_mut() else {
            return Err(TransmissionError::ProtocolViolation("data packet without open file".to_string()));
        };
        let len = match file.file_size {
            Some(size) => (size.saturating_sub(file.bytes_received) as usize).min(packet.data.len()),
            None => packet.data.len(),
        };
        file.write(&packet.data[..len])?;
        Ok(())
    }

    fn close_file(&mut self) -> Result<(), TransmissionError> {
        if let Some(file) = self.file.take() {
            let received = file.close()?;
            log::info!("'{}' done, {} bytes", received.file_name, received.bytes_received);
            self.files.push(received);
        }
        Ok(())
    }

    /// Counts a failed attempt against the retry budget.
    fn retry(&mut self, com: &mut dyn Com, err: TransmissionError) -> Result<(), TransmissionError> {
        self.errors += 1;
        self.retries += 1;
        if self.retries >= self.settings.max_retries {
            log::warn!("{:?}: {err}", err.kind());
            return Err(TransmissionError::TooManyRetries(self.retries));
        }
        log::warn!("{:?}: {err}, retry {}/{}", err.kind(), self.retries, self.settings.max_retries);
        com.flush_input()?;
        Ok(())
    }

    fn nak(&mut self, com: &mut dyn Com, err: TransmissionError) -> Result<(), TransmissionError> {
        self.retry(com, err)?;
        com.send(&[NAK])?;
        Ok(())
    }
}
