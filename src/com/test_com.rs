use std::{collections::VecDeque, time::Duration};

use super::{Com, ComError, ComResult};

/// Scripted remote end.
///
/// Input is queued as bursts, a burst is what the sender transmits in one go.
/// The next burst is released once the current one is read completely, so
/// `flush_input` only throws away what already "arrived".
#[derive(Debug, Default)]
pub struct TestCom {
    bursts: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    pub sent: Vec<u8>,
    pub flushes: usize,
    /// Return `Eof` instead of `Timeout` once the script is exhausted.
    pub eof_at_end: bool,
}

impl TestCom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_burst(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        self.bursts.push_back(data.into());
        self
    }

    pub fn take_sent(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.sent)
    }
}

impl Com for TestCom {
    fn name(&self) -> &'static str {
        "Test_Com"
    }

    fn read_u8(&mut self, timeout: Duration) -> ComResult<u8> {
        while self.pending.is_empty() {
            match self.bursts.pop_front() {
                Some(burst) => self.pending.extend(burst),
                None if self.eof_at_end => return Err(ComError::Eof),
                None => return Err(ComError::Timeout(timeout)),
            }
        }
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    fn send(&mut self, buf: &[u8]) -> ComResult<()> {
        self.sent.extend_from_slice(buf);
        Ok(())
    }

    fn flush_input(&mut self) -> ComResult<()> {
        self.flushes += 1;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bursts_are_released_in_order() {
        let mut com = TestCom::new();
        com.push_burst(b"ab".to_vec()).push_burst(b"c".to_vec());
        let t = Duration::from_millis(1);
        assert_eq!(b'a', com.read_u8(t).unwrap());
        com.flush_input().unwrap();
        assert_eq!(b'c', com.read_u8(t).unwrap());
        assert!(matches!(com.read_u8(t), Err(ComError::Timeout(_))));
    }
}
