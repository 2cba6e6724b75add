#![no_std]
#![no_main]

#[cfg(not(any(feature = "panic-semihosting", feature = "panic-halt")))]
compile_error!("Must have one of panic-{semihosting,halt} enabled");

#[cfg(feature = "panic-halt")]
extern crate panic_halt;
#[cfg(feature = "panic-semihosting")]
extern crate panic_semihosting;

// Links in the vector table even though every register access below goes
// through `Peripherals::steal()` rather than the singleton.
use rp2040_pac as _;

#[link_section = ".boot_loader"]
#[used]
pub static BOOT_LOADER: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

use cortex_m_rt::entry;
use dvfs_metrics::MetricsPipeline;
use dvfs_persist::SECTOR_SIZE;
use dvfs_shared::SharedState;
use embedded_hal::digital::v2::OutputPin;
use rp2040_hal::{
    clocks::init_clocks_and_plls,
    gpio::Pins,
    multicore::{Multicore, Stack},
    pac,
    sio::Sio,
    uart::{common_configs, UartPeripheral},
    watchdog::Watchdog,
    Timer,
};
use rp2040_platform::{LogSink, Lockout, Rp2040Clock, Rp2040Flash, Rp2040Pio, Temperature};

const XTAL_FREQ_HZ: u32 = 12_000_000;
const LOG_DMA_CHANNEL: u8 = 0;

/// Cross-core singletons. Plain `static` works for everything whose own
/// interior mutability is already atomic/`critical_section`-backed; only the
/// flash scratch buffer (an owned `[u8; SECTOR_SIZE]`, mutated only from
/// core 1) needs a raw `static mut`.
static SHARED: SharedState = SharedState::new();
static METRICS: MetricsPipeline = MetricsPipeline::new();
static LOCKOUT: Lockout = Lockout::new();
static mut SCRATCH: [u8; SECTOR_SIZE] = [0; SECTOR_SIZE];

static mut CORE1_STACK: Stack<4096> = Stack::new();

/// Core 1's entire job: the governor tick loop. A bare `fn`, not a closure,
/// so it satisfies `spawn`'s `'static` bound without borrowing anything —
/// it re-derives its own peripheral access the same way `main` does.
fn core1_task() -> ! {
    let mut pac = unsafe { pac::Peripherals::steal() };
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &pac.CLOCKS.freq());

    let clock = unsafe { Rp2040Clock::new(&LOCKOUT) };
    let flash = unsafe { Rp2040Flash::new(&LOCKOUT) };

    let mut adc = rp2040_hal::adc::Adc::new(pac.ADC, &mut pac.RESETS);
    let sensor = adc.take_temp_sensor().expect("temp sensor claimed once");
    let temperature = Temperature::new(adc, sensor);

    let pio = unsafe { Rp2040Pio::new() };
    let log = unsafe { LogSink::new(LOG_DMA_CHANNEL) };

    let scratch = unsafe { &mut SCRATCH };

    task_governor::run(task_governor::Platform {
        shared: &SHARED,
        metrics: &METRICS,
        clock,
        flash,
        temperature,
        timer,
        pio,
        log,
        scratch,
    })
}

#[entry]
fn main() -> ! {
    let mut pac = unsafe { pac::Peripherals::steal() };
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
    .expect("boot-time PLL init must succeed before the ramp engine ever touches PLL_SYS");

    let sio = Sio::new(pac.SIO);
    let pins = Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut pac.RESETS);

    // IDLE_PIN/HB_PIN: this core drives them, `Rp2040Pio` on core 1 reads
    // them back. Both rely on the same pin numbers baked into
    // `rp2040_platform::pio_stats` and `task_liveness`.
    let mut idle_pin = pins.gpio20.into_push_pull_output();
    let mut hb_pin = pins.gpio21.into_push_pull_output();
    idle_pin.set_low().ok();
    hb_pin.set_low().ok();

    let uart_pins = (pins.gpio0.into_mode(), pins.gpio1.into_mode());
    let uart = UartPeripheral::new(pac.UART0, uart_pins, &mut pac.RESETS)
        .enable(common_configs::_115200_8_N_1, clocks.peripheral_clock.freq())
        .expect("UART0 config is fixed and always valid");
    // LogSink drives UART0/DMA directly through `rp2040_pac::UART0::ptr()`;
    // this handle only exists to run the one-time baud/format setup above.
    drop(uart);

    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks.system_clock.freq());

    // PIO-equivalent wiring (now plain GPIO) must be live before core 1
    // starts polling it, matching the original's ordering: idle/heartbeat
    // setup happens before `multicore_launch_core1`.
    let mut mc = Multicore::new(&mut pac.PSM, &mut pac.PPB, &mut sio.fifo);
    let cores = mc.cores();
    let core1 = &mut cores[1];
    core1
        .spawn(unsafe { CORE1_STACK.mem() }, core1_task)
        .expect("core 1 spawn only fails if already running");

    unsafe { task_liveness::run(&SHARED, timer, &LOCKOUT) }
}
