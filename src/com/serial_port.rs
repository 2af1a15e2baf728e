use serial::prelude::*;
use std::{
    io::{self, Read, Write},
    time::Duration,
};

use super::{Com, ComError, ComResult};

/// Serial device opened 8N1 without flow control, the line the sender
/// talks to directly.
pub struct SerialCom {
    port: Box<dyn SerialPort>,
    timeout: Option<Duration>,
}

impl SerialCom {
    pub fn open(device: &str, baud_rate: usize) -> ComResult<Self> {
        let mut port = serial::open(device).map_err(io::Error::from)?;
        port.reconfigure(&|settings| {
            settings.set_baud_rate(serial::BaudRate::from_speed(baud_rate))?;
            settings.set_char_size(serial::Bits8);
            settings.set_parity(serial::ParityNone);
            settings.set_stop_bits(serial::Stop1);
            settings.set_flow_control(serial::FlowNone);
            Ok(())
        })
        .map_err(io::Error::from)?;
        log::info!("opened {device} at {baud_rate} baud");
        Ok(Self {
            port: Box::new(port),
            timeout: None,
        })
    }

    fn set_timeout(&mut self, timeout: Duration) -> ComResult<()> {
        if self.timeout != Some(timeout) {
            self.port.set_timeout(timeout).map_err(io::Error::from)?;
            self.timeout = Some(timeout);
        }
        Ok(())
    }
}

impl Com for SerialCom {
    fn name(&self) -> &'static str {
        "Serial"
    }

    fn read_u8(&mut self, timeout: Duration) -> ComResult<u8> {
        self.set_timeout(timeout)?;
        let mut b = [0];
        loop {
            match self.port.read(&mut b) {
                Ok(0) => return Err(ComError::Eof),
                Ok(_) => return Ok(b[0]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(ComError::Timeout(timeout))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> ComResult<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn flush_input(&mut self) -> ComResult<()> {
        let mut buf = [0; 256];
        self.set_timeout(Duration::from_millis(50))?;
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(size) => log::debug!("discarded {size} pending bytes"),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
