//! A scripted stand-in for the PIO front-end. The "host" side of the
//! link is a pair of byte queues loaded ahead of time: tests (or a
//! bench rig on a host machine) queue the CMD bytes of one frame, run
//! the engine until the queue runs dry — which reads as SEL rising,
//! exactly how a real frame ends — and then inspect what the card put
//! on DAT.

use heapless::{Deque, Vec};

use super::{FrameError, PsxPort};

const CHANNEL_DEPTH: usize = 512;

pub struct HostPort {
    cmd: Deque<u8, CHANNEL_DEPTH>,
    dat_in: Deque<u8, CHANNEL_DEPTH>,
    sent: Vec<u8, CHANNEL_DEPTH>,
    suppressed_at: Vec<usize, 64>,
    cancel_pending: bool,
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPort {
    pub fn new() -> HostPort {
        HostPort {
            cmd: Deque::new(),
            dat_in: Deque::new(),
            sent: Vec::new(),
            suppressed_at: Vec::new(),
            cancel_pending: false,
        }
    }

    /// Queue host-to-card command bytes.
    pub fn queue_cmd(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.cmd.push_back(b).expect("cmd channel full");
        }
    }

    /// Queue bytes another device is putting on the shared DAT line.
    pub fn queue_dat(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.dat_in.push_back(b).expect("dat channel full");
        }
    }

    /// Force a SEL rise before the queued frame is exhausted. The next
    /// blocking read cancels and both channels are flushed.
    pub fn raise_sel(&mut self) {
        self.cancel_pending = true;
    }

    /// DAT bytes the card has produced so far, in wire order.
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Drain the DAT log, keeping the port ready for another frame.
    pub fn take_sent(&mut self) -> Vec<u8, CHANNEL_DEPTH> {
        self.suppressed_at.clear();
        core::mem::take(&mut self.sent)
    }

    /// Positions in the DAT log (indices into [`Self::sent`]) at which
    /// the ACK pulse for the following exchange was suppressed.
    pub fn suppressed_at(&self) -> &[usize] {
        &self.suppressed_at
    }
}

impl PsxPort for HostPort {
    fn recv_cmd(&mut self) -> Result<u8, FrameError> {
        if self.cancel_pending {
            self.reset_frame();
            return Err(FrameError::Cancelled);
        }
        match self.cmd.pop_front() {
            Some(b) => Ok(b),
            // a drained script is the end of the frame: SEL rises
            None => Err(FrameError::Cancelled),
        }
    }

    fn recv_dat(&mut self) -> Result<u8, FrameError> {
        if self.cancel_pending {
            self.reset_frame();
            return Err(FrameError::Cancelled);
        }
        self.dat_in.pop_front().ok_or(FrameError::Cancelled)
    }

    fn send(&mut self, byte: u8) {
        self.sent.push(byte).expect("dat log full");
    }

    fn suppress_ack(&mut self) {
        let _ = self.suppressed_at.push(self.sent.len());
    }

    fn reset_frame(&mut self) {
        while self.cmd.pop_front().is_some() {}
        while self.dat_in.pop_front().is_some() {}
        self.cancel_pending = false;
    }
}
