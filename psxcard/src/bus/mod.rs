//! Contract between the protocol engine and the serial front-end.
//!
//! The front-end demodulates the four bus lines (SEL, CLK, CMD, DAT)
//! into byte FIFOs and fires the open-drain ACK pulse that admits the
//! next byte. On hardware this is a set of PIO state machines plus a
//! SEL-rise interrupt; the engine only ever sees the trait below.
//!
//! Timing is the whole design: the ACK pulse must land within ~15 us of
//! the trailing clock edge of every non-terminal byte, so nothing the
//! engine computes may sit between a byte's last clock and its ACK. The
//! engine therefore publishes the *next* DAT byte with [`PsxPort::send`]
//! before it blocks in [`PsxPort::recv_cmd`] for the byte both sides
//! are currently shifting.

pub mod host;

/// Why a blocking read returned without a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// SEL rose: the host closed the frame. All FIFOs have been
    /// cleared and the serial machines re-primed.
    Cancelled,
}

/// The card side of the console's synchronous serial link.
pub trait PsxPort {
    /// Block until the next CMD byte of the current frame arrives.
    fn recv_cmd(&mut self) -> Result<u8, FrameError>;

    /// Block until the next DAT byte arrives. Used only while sniffing
    /// traffic addressed to another device; the port never drives DAT
    /// in that mode.
    fn recv_dat(&mut self) -> Result<u8, FrameError>;

    /// Latch `byte` for the next exchange and arm the ACK pulse that
    /// follows it.
    fn send(&mut self, byte: u8);

    /// Guarantee that no ACK pulse fires for the next byte pair. The
    /// missing pulse tells the host the frame is over.
    fn suppress_ack(&mut self);

    /// Return both channels to their wait-for-clock state and clear the
    /// FIFOs. The SEL-rise interrupt performs the same work on
    /// hardware; this entry point exists for the switch path.
    fn reset_frame(&mut self);
}

/// Sync-task handle onto the front-end hardware.
pub trait BusControl {
    /// Simulate the card being briefly unplugged and replugged: stop
    /// the serial machines, leave DAT released for the configured
    /// reconnect time, then restart in sync. The host re-reads the flag
    /// byte and treats the card as freshly inserted.
    fn simulate_reconnect(&mut self);
}
