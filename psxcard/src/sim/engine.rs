//! The Mealy machine serving memory-card frames. Each tick consumes
//! one CMD byte and queues at most one DAT byte for the following
//! exchange, which keeps every response ahead of the ACK deadline.

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use spin::MutexGuard;

use super::pad::{IntentLatch, COMBO_NEW_IMAGE, COMBO_NEXT_IMAGE, COMBO_PREV_IMAGE};
use super::{FrameContext, State};
use super::{
    ACK1, ACK2, ADDR_MEMCARD, ADDR_PAD, CMD_GAME_ID, CMD_ID, CMD_PING, CMD_READ, CMD_WRITE,
    END_BAD_CHECKSUM, END_BAD_SECTOR, END_GOOD, ID1, ID2, ID_TRAILER, PAD_POLL, PING_PRESENT,
};
use crate::bus::{FrameError, PsxPort};
use crate::card::image::{CardSlot, MemoryCard, SECTOR_SIZE, TEST_SECTOR};
use crate::sync::DirtyProducer;

/// The protocol engine. Owns the front-end port and the per-frame
/// state; shares the card slot with the sync task and holds its mutex
/// for the span of one memory-card transaction.
pub struct Simulator<'a, P: PsxPort> {
    port: P,
    slot: &'a CardSlot,
    dirty: DirtyProducer<'a>,
    intents: &'a IntentLatch,
    ctx: FrameContext,
    txn: Option<MutexGuard<'a, MemoryCard>>,
}

impl<'a, P: PsxPort> Simulator<'a, P> {
    pub fn new(
        port: P,
        slot: &'a CardSlot,
        dirty: DirtyProducer<'a>,
        intents: &'a IntentLatch,
    ) -> Simulator<'a, P> {
        Simulator {
            port,
            slot,
            dirty,
            intents,
            ctx: FrameContext::new(),
            txn: None,
        }
    }

    /// Temporarily get access to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Serve the bus forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.poll();
        }
    }

    /// Process one CMD byte. Returns `false` when the read cancelled
    /// (SEL rose) and the machine was reset instead.
    pub fn poll(&mut self) -> bool {
        match self.port.recv_cmd() {
            Ok(byte) => {
                self.tick(byte);
                true
            }
            Err(FrameError::Cancelled) => {
                self.reset();
                false
            }
        }
    }

    /// SEL rose: abandon the frame. An interrupted write never reaches
    /// the commit step, so the card holds either the whole new sector
    /// or none of it.
    fn reset(&mut self) {
        self.ctx.reset();
        self.txn = None;
    }

    fn tick(&mut self, data: u8) {
        match self.ctx.state {
            State::Idle => self.on_idle(data),
            State::Command => self.on_command(data),
            State::SendId => self.on_send_id(),
            State::RecvAddr => self.on_recv_addr(data),
            State::ExecRead => self.exec_read(),
            State::ExecWrite => self.exec_write(data),
            State::ExecId => self.exec_id(),
            State::ExecPing => self.exec_ping(),
            State::ExecGameId => self.exec_game_id(data),
            State::Abort => self.on_abort(),
            State::End => self.on_end(),
            State::PadWaitCmd => self.on_pad_wait(data),
            State::PadCollect => self.on_pad_collect(),
        }
        if self.ctx.state == State::Idle {
            // transaction over, let the sync task at the card
            self.txn = None;
        }
    }

    fn on_idle(&mut self, data: u8) {
        self.ctx.soft_reset();
        match data {
            ADDR_MEMCARD => {
                let guard = self.slot.lock();
                self.port.send(guard.flag());
                self.txn = Some(guard);
                self.ctx.state = State::Command;
            }
            ADDR_PAD => {
                self.port.suppress_ack();
                self.ctx.state = State::PadWaitCmd;
            }
            _ => self.port.suppress_ack(),
        }
    }

    fn on_command(&mut self, data: u8) {
        let command = match data {
            CMD_READ => Some(State::ExecRead),
            CMD_WRITE => Some(State::ExecWrite),
            CMD_ID => Some(State::ExecId),
            CMD_PING => Some(State::ExecPing),
            CMD_GAME_ID => Some(State::ExecGameId),
            _ => None,
        };
        match command {
            Some(exec) => {
                self.ctx.pending = exec;
                self.port.send(ID1);
                self.ctx.state = State::SendId;
            }
            None => {
                self.port.send(0xFF);
                self.ctx.state = State::Idle;
            }
        }
    }

    fn on_send_id(&mut self) {
        // identify and the extension commands carry no sector address
        self.ctx.state = match self.ctx.pending {
            State::ExecId | State::ExecPing | State::ExecGameId => self.ctx.pending,
            _ => State::RecvAddr,
        };
        self.port.send(ID2);
    }

    fn on_recv_addr(&mut self, data: u8) {
        match self.ctx.counter {
            0 => {
                // filler
                self.port.send(0x00);
            }
            1 => {
                self.ctx.addr_msb = data;
                self.port.send(data);
            }
            _ => {
                self.ctx.address = BigEndian::read_u16(&[self.ctx.addr_msb, data]);
                if self.ctx.pending == State::ExecRead {
                    self.port.send(ACK1);
                } else {
                    self.port.send(data);
                }
                self.ctx.state = self.ctx.pending;
                self.ctx.pending = State::Idle;
                self.ctx.counter = 0;
                return;
            }
        }
        self.ctx.counter += 1;
    }

    fn exec_read(&mut self) {
        let card = match self.txn.as_mut() {
            Some(card) => card,
            None => unreachable!("read outside a card transaction"),
        };
        let ctx = &mut self.ctx;
        match ctx.counter {
            0 => {
                ctx.checksum = (ctx.address >> 8) as u8 ^ (ctx.address & 0x00FF) as u8;
                self.port.send(ACK2);
            }
            1 | 2 => {
                if card.sector_valid(ctx.address) {
                    let echo = if ctx.counter == 1 {
                        (ctx.address >> 8) as u8
                    } else {
                        (ctx.address & 0x00FF) as u8
                    };
                    self.port.send(echo);
                } else {
                    self.port.send(END_BAD_SECTOR);
                    ctx.state = State::Abort;
                }
            }
            n if (n as usize) < 3 + SECTOR_SIZE => {
                let byte = card.sector(ctx.address)[n as usize - 3];
                ctx.checksum ^= byte;
                self.port.send(byte);
            }
            _ => {
                self.port.send(ctx.checksum);
                ctx.finishing = State::ExecRead;
                ctx.state = State::End;
            }
        }
        ctx.counter += 1;
    }

    fn exec_write(&mut self, data: u8) {
        let card = match self.txn.as_mut() {
            Some(card) => card,
            None => unreachable!("write outside a card transaction"),
        };
        let ctx = &mut self.ctx;
        if !card.sector_valid(ctx.address) {
            self.port.send(END_BAD_SECTOR);
            ctx.state = State::Abort;
            ctx.counter += 1;
            return;
        }
        if ctx.counter == 0 {
            ctx.checksum = (ctx.address >> 8) as u8 ^ (ctx.address & 0x00FF) as u8;
        }
        if (ctx.counter as usize) < SECTOR_SIZE {
            ctx.checksum ^= data;
            ctx.staging[ctx.counter as usize] = data;
            self.port.send(data);
        } else if ctx.counter as usize == SECTOR_SIZE {
            ctx.host_checksum = data;
            self.port.send(ACK1);
        } else {
            self.port.send(ACK2);
            // commit and publish before the terminator goes out
            card.sector_mut(ctx.address).copy_from_slice(&ctx.staging);
            card.reset_seen();
            if ctx.address != TEST_SECTOR && self.dirty.enqueue(ctx.address).is_err() {
                panic!("dirty sector queue overflow");
            }
            ctx.finishing = State::ExecWrite;
            ctx.state = State::End;
        }
        ctx.counter += 1;
    }

    fn exec_id(&mut self) {
        let i = self.ctx.counter as usize;
        if i < ID_TRAILER.len() {
            self.port.send(ID_TRAILER[i]);
            self.ctx.counter += 1;
        } else {
            self.ctx.state = State::Idle;
        }
    }

    fn exec_ping(&mut self) {
        match self.ctx.counter {
            0 | 1 => self.port.send(0x00), // reserved
            _ => {
                self.port.send(PING_PRESENT);
                self.ctx.state = State::Idle;
            }
        }
        self.ctx.counter += 1;
    }

    fn exec_game_id(&mut self, data: u8) {
        let ctx = &mut self.ctx;
        if ctx.counter == 0 {
            ctx.game_id_len = data;
            ctx.game_id.clear();
            self.port.send(0x00);
            if ctx.game_id_len == 0 {
                debug!("game id: empty");
                ctx.state = State::Idle;
            }
        } else if ctx.counter <= ctx.game_id_len as u16 {
            let _ = ctx.game_id.push(data); // oversized payloads are truncated
            self.port.send(0x00);
            if ctx.counter == ctx.game_id_len as u16 {
                debug!("game id: {:02x?}", &ctx.game_id[..]);
                ctx.state = State::Idle;
            }
        } else {
            ctx.state = State::Idle;
        }
        ctx.counter += 1;
    }

    fn on_abort(&mut self) {
        self.port.send(END_BAD_SECTOR);
        self.ctx.state = State::Idle;
    }

    fn on_end(&mut self) {
        match self.ctx.finishing {
            State::ExecRead => {
                self.port.suppress_ack();
                self.port.send(END_GOOD);
            }
            _ => {
                let terminator = if self.ctx.host_checksum == self.ctx.checksum {
                    END_GOOD
                } else {
                    END_BAD_CHECKSUM
                };
                self.port.send(terminator);
            }
        }
        self.ctx.state = State::Idle;
    }

    fn on_pad_wait(&mut self, data: u8) {
        // never drive DAT or ACK while another device is addressed
        self.port.suppress_ack();
        self.ctx.state = if data == PAD_POLL {
            State::PadCollect
        } else {
            State::Idle
        };
    }

    fn on_pad_collect(&mut self) {
        self.port.suppress_ack();
        match self.ctx.counter {
            0 => {
                // drop the Hi-Z filler and the two identity bytes
                for _ in 0..3 {
                    if self.port.recv_dat().is_err() {
                        self.reset();
                        return;
                    }
                }
            }
            1 => match self.port.recv_dat() {
                Ok(low) => self.ctx.buttons = low as u16,
                Err(_) => {
                    self.reset();
                    return;
                }
            },
            2 => match self.port.recv_dat() {
                Ok(high) => {
                    self.ctx.buttons |= (high as u16) << 8;
                    match self.ctx.buttons {
                        COMBO_NEXT_IMAGE => self.intents.request_next(),
                        COMBO_PREV_IMAGE => self.intents.request_prev(),
                        COMBO_NEW_IMAGE => self.intents.request_new(),
                        _ => {}
                    }
                }
                Err(_) => {
                    self.reset();
                    return;
                }
            },
            _ => self.ctx.state = State::Idle,
        }
        self.ctx.counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;
    use crate::bus::host::HostPort;
    use crate::card::image::{CardSlot, FLAG_DEFAULT, SECTOR_COUNT};
    use crate::manager;
    use crate::store::ram::RamStore;
    use crate::sync::SectorQueue;

    fn run_frame(sim: &mut Simulator<HostPort>, frame: &[u8]) -> Vec<u8> {
        sim.port_mut().queue_cmd(frame);
        while sim.poll() {}
        sim.port_mut().take_sent().to_vec()
    }

    /// A read frame: select, command, two fillers, the address, then
    /// enough clocking for echoes, payload, checksum and terminator.
    fn read_frame(sector: u16) -> Vec<u8> {
        let mut frame = vec![0x81, 0x52, 0x00, 0x00, (sector >> 8) as u8, sector as u8];
        frame.resize(frame.len() + 133, 0x00);
        frame
    }

    fn write_frame(sector: u16, payload: &[u8; SECTOR_SIZE], host_checksum: u8) -> Vec<u8> {
        let mut frame = vec![0x81, 0x57, 0x00, 0x00, (sector >> 8) as u8, sector as u8];
        frame.extend_from_slice(payload);
        frame.push(host_checksum);
        frame.extend_from_slice(&[0x00, 0x00]);
        frame
    }

    fn blank_slot() -> (CardSlot, RamStore) {
        let mut store = RamStore::new();
        let name = manager::create(&mut store).unwrap();
        let mut card = MemoryCard::new();
        card.load_from(&mut store, name.as_str()).unwrap();
        (CardSlot::new(card), store)
    }

    #[test]
    fn s1_identify_on_first_power_up() {
        let slot = CardSlot::new(MemoryCard::new());
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        let sent = run_frame(&mut sim, &[0x81, 0x53, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            sent,
            vec![0x08, 0x5A, 0x5D, 0x5C, 0x5D, 0x04, 0x00, 0x00, 0x80]
        );
    }

    #[test]
    fn s2_read_sector_zero_of_a_blank_image() {
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        sim.port_mut().queue_cmd(&read_frame(0x0000));
        while sim.poll() {}
        // no ACK after the terminator
        assert_eq!(sim.port().suppressed_at(), &[138usize][..]);
        let sent = sim.port_mut().take_sent().to_vec();
        assert_eq!(sent.len(), 139);
        assert_eq!(&sent[..9], &[0x08, 0x5A, 0x5D, 0x00, 0x00, 0x5C, 0x5D, 0x00, 0x00]);
        let payload = &sent[9..9 + SECTOR_SIZE];
        assert_eq!(&payload[0..2], b"MC");
        assert_eq!(payload[127], b'M' ^ b'C');
        // the stored sector already ends in its own XOR, so the frame
        // checksum over MSB, LSB and the payload cancels to zero
        assert_eq!(sent[137], 0x00);
        assert_eq!(sent[138], END_GOOD);
    }

    #[test]
    fn s3_write_then_read_back() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, mut rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        // XOR of 128 copies of 0xAA cancels, leaving MSB ^ LSB
        let sent = run_frame(&mut sim, &write_frame(0x0040, &[0xAA; SECTOR_SIZE], 0x40));
        assert_eq!(sent[0], FLAG_DEFAULT);
        assert_eq!(&sent[1..6], &[0x5A, 0x5D, 0x00, 0x00, 0x40]);
        assert!(sent[6..134].iter().all(|&b| b == 0xAA));
        assert_eq!(&sent[134..137], &[0x5C, 0x5D, END_GOOD]);
        assert_eq!(rx.dequeue(), Some(0x0040));
        assert_eq!(rx.dequeue(), None);

        let sent = run_frame(&mut sim, &read_frame(0x0040));
        // the flag byte now reports the card as seen
        assert_eq!(sent[0], 0x00);
        assert!(sent[9..137].iter().all(|&b| b == 0xAA));
        assert_eq!(sent[137], 0x40);
        assert_eq!(sent[138], END_GOOD);
    }

    #[test]
    fn s4_read_of_an_invalid_sector_aborts() {
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        let mut frame = vec![0x81, 0x52, 0x00, 0x00, 0x04, 0x00];
        frame.resize(frame.len() + 8, 0x00);
        let sent = run_frame(&mut sim, &frame);
        // address echo, then the two abort markers and silence
        assert_eq!(
            sent,
            vec![0x08, 0x5A, 0x5D, 0x00, 0x04, 0x5C, 0x5D, 0xFF, 0xFF]
        );
    }

    #[test]
    fn s5_bad_checksum_reports_but_commits() {
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, mut rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        // true checksum is 0x00 ^ 0x10 ^ 0x00 = 0x10, host claims 0x7F
        let sent = run_frame(&mut sim, &write_frame(0x0010, &[0x11; SECTOR_SIZE], 0x7F));
        assert_eq!(&sent[134..137], &[0x5C, 0x5D, END_BAD_CHECKSUM]);
        // the received payload is committed anyway; the host will
        // rewrite the sector when it retries
        assert!(slot.lock().sector(0x0010).iter().all(|&b| b == 0x11));
        assert_eq!(rx.dequeue(), Some(0x0010));
    }

    #[test]
    fn write_to_the_test_sector_is_not_persisted() {
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, mut rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        // XOR of 128 copies of 0x77 cancels, leaving 0x00 ^ 0x3F
        let sent = run_frame(&mut sim, &write_frame(0x003F, &[0x77; SECTOR_SIZE], 0x3F));
        assert_eq!(sent[136], END_GOOD);
        assert_eq!(rx.dequeue(), None);
        assert!(slot.lock().sector(TEST_SECTOR).iter().all(|&b| b == 0x77));
    }

    #[test]
    fn write_to_an_invalid_sector_terminates_with_ff() {
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, mut rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        let sent = run_frame(&mut sim, &write_frame(0x0400, &[0x01; SECTOR_SIZE], 0x00));
        assert_eq!(&sent[..6], &[0x08, 0x5A, 0x5D, 0x00, 0x04, 0x00]);
        // every byte after the address handshake is the abort marker
        assert!(sent[6..].iter().all(|&b| b == 0xFF));
        assert_eq!(rx.dequeue(), None);
    }

    #[test]
    fn cancelled_write_leaves_no_partial_sector() {
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, mut rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        // the frame dies 50 bytes into the payload
        let mut frame = vec![0x81, 0x57, 0x00, 0x00, 0x00, 0x90];
        frame.extend_from_slice(&[0xEE; 50]);
        run_frame(&mut sim, &frame);

        assert!(slot.lock().sector(0x0090).iter().all(|&b| b == 0));
        assert_eq!(rx.dequeue(), None);
        // and the machine is back in idle, flag untouched
        let sent = run_frame(&mut sim, &[0x81, 0x53, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(sent[0], FLAG_DEFAULT);
    }

    #[test]
    fn unknown_commands_fall_back_to_idle() {
        let slot = CardSlot::new(MemoryCard::new());
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        let sent = run_frame(&mut sim, &[0x81, 0x99, 0x00, 0x00]);
        assert_eq!(sent, vec![0x08, 0xFF]);
        // a full frame still works afterwards
        let sent = run_frame(&mut sim, &[0x81, 0x53, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(sent[1], ID1);
    }

    #[test]
    fn ping_extension_reports_card_present() {
        let slot = CardSlot::new(MemoryCard::new());
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        let sent = run_frame(&mut sim, &[0x81, 0x20, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(sent, vec![0x08, 0x5A, 0x5D, 0x00, 0x00, PING_PRESENT]);
    }

    #[test]
    fn game_id_extension_consumes_its_payload() {
        let slot = CardSlot::new(MemoryCard::new());
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        let sent = run_frame(&mut sim, &[0x81, 0x21, 0x00, 0x04, b'S', b'L', b'U', b'S']);
        assert_eq!(&sent[..3], &[0x08, 0x5A, 0x5D]);
        assert!(sent[3..].iter().all(|&b| b == 0x00));
        // the card state is untouched and the machine is idle again
        let sent = run_frame(&mut sim, &[0x81, 0x53, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(sent[0], FLAG_DEFAULT);
    }

    fn sniff_frame(sim: &mut Simulator<HostPort>, low: u8, high: u8) {
        sim.port_mut().queue_dat(&[0xFF, 0x41, 0x5A, low, high]);
        sim.port_mut().queue_cmd(&[0x01, 0x42, 0x00, 0x00, 0x00]);
        while sim.poll() {}
        assert!(sim.port_mut().take_sent().is_empty());
    }

    #[test]
    fn s6_sniffed_combo_latches_a_new_image_intent() {
        let slot = CardSlot::new(MemoryCard::new());
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        // START+SELECT+TRIANGLE held: bitmap 0xEFF6, low byte first
        sniff_frame(&mut sim, 0xF6, 0xEF);
        assert!(intents.take_new());
        assert!(!intents.take_next());
        assert!(!intents.take_prev());
    }

    #[test]
    fn sniffed_next_and_prev_combos() {
        let slot = CardSlot::new(MemoryCard::new());
        let mut queue = SectorQueue::new();
        let (tx, _rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        sniff_frame(&mut sim, 0xE6, 0xFF); // START+SELECT+UP
        assert!(intents.take_next());
        sniff_frame(&mut sim, 0xB6, 0xFF); // START+SELECT+DOWN
        assert!(intents.take_prev());
        // an extra button defeats the combo
        sniff_frame(&mut sim, 0xE6, 0xBF);
        assert!(!intents.take_next());
    }

    #[test]
    fn full_card_rewrite_fits_the_queue() {
        let (slot, _store) = blank_slot();
        let mut queue = SectorQueue::new();
        let (tx, rx) = queue.split();
        let intents = IntentLatch::new();
        let mut sim = Simulator::new(HostPort::new(), &slot, tx, &intents);

        for sector in 0..SECTOR_COUNT as u16 {
            let checksum = (sector >> 8) as u8 ^ sector as u8; // zero payload
            run_frame(&mut sim, &write_frame(sector, &[0x00; SECTOR_SIZE], checksum));
        }
        // everything except the write-test sector is ticketed
        let mut rx = rx;
        let mut count = 0;
        while rx.dequeue().is_some() {
            count += 1;
        }
        assert_eq!(count, SECTOR_COUNT - 1);
    }
}
