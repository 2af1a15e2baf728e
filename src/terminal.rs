use std::io::{self, IsTerminal};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

/// Keeps the controlling terminal in raw mode while alive.
///
/// Call [`RawModeGuard::restore`] on the way out to see restore errors,
/// dropping the guard restores silently.
#[derive(Debug)]
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// Enters raw mode if stdin is a terminal, otherwise returns a guard that
    /// does nothing.
    pub fn enter() -> io::Result<Self> {
        if !io::stdin().is_terminal() {
            log::debug!("stdin is not a terminal, leaving tty settings alone");
            return Ok(Self::inactive());
        }
        enable_raw_mode()?;
        log::debug!("raw mode entered");
        Ok(Self { active: true })
    }

    pub fn inactive() -> Self {
        Self { active: false }
    }

    pub fn restore(mut self) -> io::Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> io::Result<()> {
        if self.active {
            self.active = false;
            disable_raw_mode()?;
            log::debug!("terminal restored");
        }
        Ok(())
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = self.restore_inner() {
            log::error!("can't restore terminal: {err}");
        }
    }
}
