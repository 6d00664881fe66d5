#![no_std]
#![no_main]

use defmt_rtt as _; // global logger
use panic_probe as _;

use cortex_m_rt::entry;
use embedded_hal::spi::MODE_0;
use fugit::RateExtU32;
use rp2040_hal as hal;

use hal::clocks::init_clocks_and_plls;
use hal::multicore::{Multicore, Stack};
use hal::pac;
use hal::pac::interrupt;
use hal::sio::Sio;
use hal::watchdog::Watchdog;
use hal::Timer;

use psxcard::card::image::{CardSlot, MemoryCard};
use psxcard::led::Indicator;
use psxcard::sim::pad::IntentLatch;
use psxcard::sim::Simulator;
use psxcard::sync::{SectorQueue, SyncWorker};
use psxcard::CardError;
use psxcard_hal::pico::rp2040 as board;

/// RP2040 boots from external QSPI flash; this 256 byte header sets the
/// W25Q080 up for fast code access before anything else runs.
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

const XTAL_FREQ_HZ: u32 = 12_000_000;

/// The active card and its switch mutex, shared by both cores.
static CARD: CardSlot = CardSlot::new(MemoryCard::new());
static INTENTS: IntentLatch = IntentLatch::new();
static mut DIRTY_QUEUE: SectorQueue = SectorQueue::new();
static mut CORE1_STACK: Stack<4096> = Stack::new();

#[entry]
fn main() -> ! {
    let mut pac = pac::Peripherals::take().unwrap();
    let core = pac::CorePeripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let clocks = init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    let mut sio = Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

    let mut led = board::StatusLed::new(pins.gpio25.into_push_pull_output(), timer);

    /* SD card over SPI0 */
    let miso = pins.gpio16.into_function::<hal::gpio::FunctionSpi>();
    let cs = pins.gpio17.into_push_pull_output();
    let sck = pins.gpio18.into_function::<hal::gpio::FunctionSpi>();
    let mosi = pins.gpio19.into_function::<hal::gpio::FunctionSpi>();
    let spi = hal::spi::Spi::<_, _, _, 8>::new(pac.SPI0, (mosi, miso, sck)).init(
        &mut pac.RESETS,
        clocks.peripheral_clock.freq(),
        5.MHz(),
        MODE_0,
    );
    let delay = cortex_m::delay::Delay::new(core.SYST, clocks.system_clock.freq().to_Hz());
    let sdcard = embedded_sdmmc::SdCard::new(spi, cs, delay);
    let store = match board::SdStore::mount(sdcard) {
        Ok(store) => store,
        Err(_) => {
            defmt::error!("no usable volume on the SD card");
            loop {
                led.blink_error(CardError::Mount.code());
            }
        }
    };

    /* hand the PSX lines to PIO0 */
    let _dat = pins.gpio5.into_function::<hal::gpio::FunctionPio0>();
    let _cmd = pins.gpio6.into_function::<hal::gpio::FunctionPio0>();
    let _sel = pins.gpio7.into_function::<hal::gpio::FunctionPio0>();
    let _clk = pins.gpio8.into_function::<hal::gpio::FunctionPio0>();
    let _ack = pins.gpio9.into_function::<hal::gpio::FunctionPio0>();
    let (port, control) = board::front_end(pac.PIO0, &mut pac.RESETS, timer);
    unsafe { pac::NVIC::unmask(pac::Interrupt::PIO0_IRQ_0) };

    let (dirty_tx, dirty_rx) = unsafe { DIRTY_QUEUE.split() };

    /* the engine gets core 1 to itself; it must be back inside
    recv_cmd within microseconds of every byte */
    let mut mc = Multicore::new(&mut pac.PSM, &mut pac.PPB, &mut sio.fifo);
    let cores = mc.cores();
    let core1 = &mut cores[1];
    core1
        .spawn(unsafe { &mut CORE1_STACK.mem }, move || {
            let mut sim = Simulator::new(port, &CARD, dirty_tx, &INTENTS);
            sim.run()
        })
        .unwrap();

    defmt::info!("memory card simulation starting");

    /* core 0 owns the file system, the LED and the switch requests */
    let mut worker = SyncWorker::new(store, led, control, &CARD, dirty_rx, &INTENTS);
    if let Err(e) = worker.init() {
        defmt::error!("no image to serve, code {}", e.code());
        worker.fail_forever(e.code());
    }
    worker.run()
}

#[interrupt]
fn PIO0_IRQ_0() {
    board::on_sel_rise();
}
