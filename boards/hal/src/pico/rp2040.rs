/*
    IMPORTANT NOTE ABOUT THE BUS PINOUT:
    The four PSX lines must sit on consecutive GPIOs in the order
    DAT, CMD, SEL, CLK, because each PIO program addresses its clock
    and select lines as fixed offsets from its input pin base. ACK is
    free to live anywhere.
*/

use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::v2::OutputPin;
use pio::{Instruction, InstructionOperands, JmpCondition};
use rp2040_hal as hal;

use hal::pac;
use hal::pio::{
    PIOBuilder, PIOExt, PinDir, Running, Rx, ShiftDirection, StateMachine, Tx, SM0, SM1, SM2, SM3,
};
use hal::Timer;

use psxcard::bus::{BusControl, FrameError, PsxPort};
use psxcard::constants::RECONNECT_TIME_MS;
use psxcard::led::Indicator;
use psxcard::store::{EntryInfo, FileName, FileStore, StoreError};

#[rustfmt::skip]
mod pinout {
    /// PSX interface. DAT..CLK must stay consecutive.
    pub const PIN_DAT: u8 = 5;
    pub const PIN_CMD: u8 = PIN_DAT + 1;
    pub const PIN_SEL: u8 = PIN_CMD + 1;
    pub const PIN_CLK: u8 = PIN_SEL + 1;
    pub const PIN_ACK: u8 = 9;
}

pub use pinout::*;

/// Set by the SEL-rise interrupt; consumed inside `recv_*`. The
/// interrupt only latches the edge, the engine context re-primes the
/// serial machines before the next frame can open.
static SEL_ROSE: AtomicBool = AtomicBool::new(false);

/// Call from the `PIO0_IRQ_0` handler. Acknowledges the PIO interrupt
/// and flags the frame as cancelled.
pub fn on_sel_rise() {
    SEL_ROSE.store(true, Ordering::Release);
    // clear PIO0 irq flag 0 so the monitor can fire again
    unsafe { (*pac::PIO0::ptr()).irq.write(|w| w.bits(1)) };
}

fn take_sel_rise() -> bool {
    if SEL_ROSE.load(Ordering::Acquire) {
        SEL_ROSE.store(false, Ordering::Release);
        true
    } else {
        false
    }
}

fn jmp_to(address: u8) -> Instruction {
    Instruction {
        operands: InstructionOperands::JMP {
            condition: JmpCondition::Always,
            address,
        },
        delay: 0,
        side_set: None,
    }
}

type CmdSm = StateMachine<(pac::PIO0, SM1), Running>;
type DatRdSm = StateMachine<(pac::PIO0, SM2), Running>;
type DatWrSm = StateMachine<(pac::PIO0, SM3), Running>;

/// Engine-side handle: the byte FIFOs plus the state machines they
/// hang off, so a cancelled frame can be re-primed from here.
pub struct PioPort {
    cmd_sm: CmdSm,
    dat_rd_sm: DatRdSm,
    dat_wr_sm: DatWrSm,
    cmd_rx: Rx<(pac::PIO0, SM1)>,
    dat_rx: Rx<(pac::PIO0, SM2)>,
    dat_tx: Tx<(pac::PIO0, SM3)>,
    pcs: [u8; 3],
}

impl PioPort {
    fn restart_machines(&mut self) {
        let [cmd_pc, dat_rd_pc, dat_wr_pc] = self.pcs;
        self.cmd_sm.exec_instruction(jmp_to(cmd_pc));
        self.dat_rd_sm.exec_instruction(jmp_to(dat_rd_pc));
        self.dat_wr_sm.exec_instruction(jmp_to(dat_wr_pc));
        while self.cmd_rx.read().is_some() {}
        while self.dat_rx.read().is_some() {}
        self.dat_wr_sm.drain_tx_fifo();
    }
}

impl PsxPort for PioPort {
    fn recv_cmd(&mut self) -> Result<u8, FrameError> {
        loop {
            if take_sel_rise() {
                self.reset_frame();
                return Err(FrameError::Cancelled);
            }
            if let Some(word) = self.cmd_rx.read() {
                // bits shift in LSB-first, the byte sits in the top lane
                return Ok((word >> 24) as u8);
            }
            core::hint::spin_loop();
        }
    }

    fn recv_dat(&mut self) -> Result<u8, FrameError> {
        loop {
            if take_sel_rise() {
                self.reset_frame();
                return Err(FrameError::Cancelled);
            }
            if let Some(word) = self.dat_rx.read() {
                return Ok((word >> 24) as u8);
            }
            core::hint::spin_loop();
        }
    }

    fn send(&mut self, byte: u8) {
        self.dat_tx.write(byte as u32);
    }

    fn suppress_ack(&mut self) {
        // rewinding the reader before its ACK step skips the pulse
        let [cmd_pc, _, _] = self.pcs;
        self.cmd_sm.exec_instruction(jmp_to(cmd_pc));
    }

    fn reset_frame(&mut self) {
        self.restart_machines();
    }
}

/// Sync-side handle onto the front end: the SEL monitor plus a timer
/// for the reconnect window.
pub struct PioControl {
    sel_sm: Option<StateMachine<(pac::PIO0, SM0), Running>>,
    timer: Timer,
}

impl BusControl for PioControl {
    fn simulate_reconnect(&mut self) {
        if let Some(sel_sm) = self.sel_sm.take() {
            // mask interrupts so a stray SEL edge cannot race the restart
            let stopped = cortex_m::interrupt::free(|_| {
                SEL_ROSE.store(true, Ordering::Release);
                sel_sm.stop()
            });
            // DAT stays released while the machines sit idle; to the
            // host the card is simply gone
            delay_ms(&self.timer, RECONNECT_TIME_MS);
            self.sel_sm = Some(stopped.start());
        }
    }
}

/// Bring up the four PIO state machines over the PSX lines and hand
/// back the two ends of the front end.
pub fn front_end(
    pio0: pac::PIO0,
    resets: &mut pac::RESETS,
    timer: Timer,
) -> (PioPort, PioControl) {
    let (mut pio, sm0, sm1, sm2, sm3) = pio0.split(resets);

    // Raise irq 0 when SEL goes back high: the frame is over.
    let sel_monitor = pio_proc::pio_asm!(
        ".wrap_target",
        "    wait 0 pin 0",
        "    wait 1 pin 0",
        "    irq set 0",
        ".wrap",
    );

    // Shift one CMD bit per rising CLK edge, push every 8, then pulse
    // ACK unless the engine rewinds us first. pin 2 relative to CMD is
    // CLK; the set group drives ACK as an open drain.
    let cmd_reader = pio_proc::pio_asm!(
        ".wrap_target",
        "    set x, 7",
        "bitloop:",
        "    wait 0 pin 2",
        "    wait 1 pin 2",
        "    in pins, 1",
        "    jmp x-- bitloop",
        "    push block",
        "    nop [15]",
        "    set pindirs, 1 [15]",
        "    set pindirs, 0",
        ".wrap",
    );

    // Same sampling, no ACK: this one only listens, for frames that
    // belong to another device. pin 3 relative to DAT is CLK.
    let dat_reader = pio_proc::pio_asm!(
        ".wrap_target",
        "    set x, 7",
        "bitloop:",
        "    wait 0 pin 3",
        "    wait 1 pin 3",
        "    in pins, 1",
        "    jmp x-- bitloop",
        "    push block",
        ".wrap",
    );

    // Stall with DAT released until the engine queues a byte, then
    // shift it out LSB-first on falling CLK edges.
    let dat_writer = pio_proc::pio_asm!(
        ".wrap_target",
        "    pull block",
        "    set pindirs, 1",
        "    set x, 7",
        "bitloop:",
        "    wait 1 pin 3",
        "    wait 0 pin 3",
        "    out pins, 1",
        "    jmp x-- bitloop",
        "    set pindirs, 0",
        ".wrap",
    );

    let installed = pio.install(&sel_monitor.program).unwrap();
    let (sel_sm, _, _) = PIOBuilder::from_installed_program(installed)
        .in_pin_base(PIN_SEL)
        .clock_divisor_fixed_point(15, 0)
        .build(sm0);

    let installed = pio.install(&cmd_reader.program).unwrap();
    let cmd_pc = installed.wrap_target();
    let (mut cmd_sm, cmd_rx, _) = PIOBuilder::from_installed_program(installed)
        .in_pin_base(PIN_CMD)
        .set_pins(PIN_ACK, 1)
        .in_shift_direction(ShiftDirection::Right)
        .clock_divisor_fixed_point(15, 0)
        .build(sm1);
    cmd_sm.set_pindirs([(PIN_ACK, PinDir::Input)]);

    let installed = pio.install(&dat_reader.program).unwrap();
    let dat_rd_pc = installed.wrap_target();
    let (dat_rd_sm, dat_rx, _) = PIOBuilder::from_installed_program(installed)
        .in_pin_base(PIN_DAT)
        .in_shift_direction(ShiftDirection::Right)
        .clock_divisor_fixed_point(15, 0)
        .build(sm2);

    let installed = pio.install(&dat_writer.program).unwrap();
    let dat_wr_pc = installed.wrap_target();
    let (mut dat_wr_sm, _, dat_tx) = PIOBuilder::from_installed_program(installed)
        .in_pin_base(PIN_DAT)
        .out_pins(PIN_DAT, 1)
        .set_pins(PIN_DAT, 1)
        .out_shift_direction(ShiftDirection::Right)
        .clock_divisor_fixed_point(15, 0)
        .build(sm3);
    dat_wr_sm.set_pindirs([(PIN_DAT, PinDir::Input)]);

    pio.irq0().enable_sm_interrupt(0);

    let pcs = [cmd_pc, dat_rd_pc, dat_wr_pc];
    let port = PioPort {
        cmd_sm: cmd_sm.start(),
        dat_rd_sm: dat_rd_sm.start(),
        dat_wr_sm: dat_wr_sm.start(),
        cmd_rx,
        dat_rx,
        dat_tx,
        pcs,
    };
    let control = PioControl {
        sel_sm: Some(sel_sm.start()),
        timer,
    };
    (port, control)
}

fn delay_ms(timer: &Timer, ms: u32) {
    let start = timer.get_counter();
    while (timer.get_counter() - start).to_millis() < ms as u64 {}
}

/// The status LED, driven with the blocking patterns the sync loop
/// expects: solid while in sync, blink codes for everything else.
pub struct StatusLed<P: OutputPin> {
    pin: P,
    timer: Timer,
}

impl<P: OutputPin> StatusLed<P> {
    pub fn new(pin: P, timer: Timer) -> StatusLed<P> {
        StatusLed { pin, timer }
    }

    fn blink(&mut self, count: u8, on_ms: u32, off_ms: u32) {
        for _ in 0..count {
            let _ = self.pin.set_high();
            delay_ms(&self.timer, on_ms);
            let _ = self.pin.set_low();
            delay_ms(&self.timer, off_ms);
        }
    }
}

impl<P: OutputPin> Indicator for StatusLed<P> {
    fn sync_status(&mut self, in_sync: bool) {
        if in_sync {
            let _ = self.pin.set_high();
        } else {
            let _ = self.pin.set_low();
        }
    }

    fn image_change(&mut self) {
        self.blink(1, 100, 100);
    }

    fn end_of_list(&mut self) {
        self.blink(3, 150, 150);
    }

    fn new_image(&mut self) {
        self.blink(10, 50, 50);
    }

    fn blink_error(&mut self, code: u8) {
        let _ = self.pin.set_low();
        delay_ms(&self.timer, 500);
        self.blink(code, 500, 500);
    }
}

/// A zeroed timestamp for the FAT driver; the board has no RTC.
pub struct NullTime;

impl embedded_sdmmc::TimeSource for NullTime {
    fn get_timestamp(&self) -> embedded_sdmmc::Timestamp {
        embedded_sdmmc::Timestamp {
            year_since_1970: 0,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// [`FileStore`] over a FAT volume on the SPI SD card.
pub struct SdStore<D>
where
    D: embedded_sdmmc::BlockDevice,
{
    volume_mgr: embedded_sdmmc::VolumeManager<D, NullTime>,
    volume: embedded_sdmmc::RawVolume,
    root: embedded_sdmmc::RawDirectory,
}

impl<D> SdStore<D>
where
    D: embedded_sdmmc::BlockDevice,
{
    /// Mount the first partition and park on the root directory.
    pub fn mount(device: D) -> Result<SdStore<D>, StoreError> {
        let mut volume_mgr = embedded_sdmmc::VolumeManager::new(device, NullTime);
        let volume = volume_mgr
            .open_raw_volume(embedded_sdmmc::VolumeIdx(0))
            .map_err(|_| StoreError::Io)?;
        let root = volume_mgr.open_root_dir(volume).map_err(|_| StoreError::Io)?;
        Ok(SdStore {
            volume_mgr,
            volume,
            root,
        })
    }

    fn open(
        &mut self,
        name: &str,
        mode: embedded_sdmmc::Mode,
    ) -> Result<embedded_sdmmc::RawFile, StoreError> {
        self.volume_mgr
            .open_file_in_dir(self.root, name, mode)
            .map_err(map_err)
    }
}

fn map_err<E: core::fmt::Debug>(err: embedded_sdmmc::Error<E>) -> StoreError {
    match err {
        embedded_sdmmc::Error::NotFound => StoreError::NotFound,
        embedded_sdmmc::Error::FileAlreadyExists => StoreError::Exists,
        embedded_sdmmc::Error::DiskFull | embedded_sdmmc::Error::NotEnoughSpace => StoreError::Full,
        _ => StoreError::Io,
    }
}

impl<D> FileStore for SdStore<D>
where
    D: embedded_sdmmc::BlockDevice,
{
    fn iterate_root<F>(&mut self, mut func: F) -> Result<(), StoreError>
    where
        F: FnMut(&EntryInfo),
    {
        self.volume_mgr
            .iterate_dir(self.root, |entry| {
                let mut name: heapless::String<16> = heapless::String::new();
                if write!(name, "{}", entry.name).is_err() {
                    return;
                }
                let name = match FileName::new(name.as_str()) {
                    Ok(name) => name,
                    Err(_) => return,
                };
                func(&EntryInfo {
                    name,
                    size: entry.size,
                    directory: entry.attributes.is_directory(),
                });
            })
            .map_err(map_err)
    }

    fn size_of(&mut self, name: &str) -> Result<u32, StoreError> {
        self.volume_mgr
            .find_directory_entry(self.root, name)
            .map(|entry| entry.size)
            .map_err(map_err)
    }

    fn read_at(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StoreError> {
        let file = self.open(name, embedded_sdmmc::Mode::ReadOnly)?;
        let result = (|| {
            self.volume_mgr
                .file_seek_from_start(file, offset)
                .map_err(map_err)?;
            self.volume_mgr.read(file, buf).map_err(map_err)
        })();
        let _ = self.volume_mgr.close_file(file);
        result
    }

    fn write_at(&mut self, name: &str, offset: u32, data: &[u8]) -> Result<usize, StoreError> {
        let file = self.open(name, embedded_sdmmc::Mode::ReadWriteAppend)?;
        let result = (|| {
            self.volume_mgr
                .file_seek_from_start(file, offset)
                .map_err(map_err)?;
            self.volume_mgr.write(file, data).map_err(map_err)?;
            Ok(data.len())
        })();
        let _ = self.volume_mgr.close_file(file);
        result
    }

    fn create_new(&mut self, name: &str) -> Result<(), StoreError> {
        let file = self.open(name, embedded_sdmmc::Mode::ReadWriteCreate)?;
        self.volume_mgr.close_file(file).map_err(map_err)
    }

    fn replace(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let file = self.open(name, embedded_sdmmc::Mode::ReadWriteCreateOrTruncate)?;
        let result = self.volume_mgr.write(file, data).map_err(map_err);
        let _ = self.volume_mgr.close_file(file);
        result
    }

    fn exists(&mut self, name: &str) -> bool {
        self.volume_mgr.find_directory_entry(self.root, name).is_ok()
    }
}
