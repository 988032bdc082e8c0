use core::mem::MaybeUninit;

use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::pipe::Pipe;
use embassy_sync::signal::Signal;
use module_core::collaborators::{ConfigSnapshot, EepromConfig};
use module_core::durable::DurableState;
use module_core::node::{BoardParts, ModuleController};
use module_core::transport::{CanFrame, CanTransport};
use static_cell::StaticCell;

use crate::console::{Line, REPLY_CAPACITY};
use crate::hw::{self, Hardware};
use crate::status;

mod adc_task;
mod can_task;
mod cell_task;
mod console_task;
mod fault_task;
mod node_task;
mod tick_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cortex_m::interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cortex_m::interrupt::enable();
            }
        }
    }
}

/// Everything the node task reacts to.
pub enum NodeInput {
    Tick,
    Frame(CanFrame),
    AdcPass([u16; module_core::frame::AdcChannel::COUNT]),
    Console(Line),
}

pub const NODE_INPUT_DEPTH: usize = 16;

pub type NodeInputs = Channel<CriticalSectionRawMutex, NodeInput, NODE_INPUT_DEPTH>;
pub type Node = ModuleController<'static, Hardware>;

pub(super) static NODE_INPUTS: NodeInputs = Channel::new();
/// Raised by the fault task after it records a fault in `hw::power::FAULTS`.
pub(super) static FAULT_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();
pub(super) static CONSOLE_OUT: Pipe<CriticalSectionRawMutex, REPLY_CAPACITY> = Pipe::new();
pub(super) static TRANSPORT: CanTransport<hw::can::FdcanController> =
    CanTransport::new(hw::can::FdcanController::new());

/// Survives resets: the linker leaves `.uninit` untouched at startup.
#[unsafe(link_section = ".uninit.DURABLE")]
static mut DURABLE: MaybeUninit<DurableState> = MaybeUninit::uninit();

static NODE: StaticCell<Node> = StaticCell::new();

/// Runs the fault task above thread mode so it preempts blocking settles.
static FAULT_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn USART3_4_5_6_LPUART1() {
    unsafe { FAULT_EXECUTOR.on_interrupt() }
}

/// Posts an input without waiting; a full queue drops it and counts the drop.
pub fn post(input: NodeInput) {
    if NODE_INPUTS.try_send(input).is_err() {
        status::record_input_dropped();
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let cause = hw::take_reset_cause();
    status::record_reset_cause(cause);

    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA2,
        PA3,
        PA4,
        PA5,
        PA6,
        PA8,
        PA11,
        PA12,
        PA15,
        PB0,
        PB1,
        PB4,
        PB5,
        PB6,
        PB7,
        ADC1,
        EXTI4,
        EXTI5,
        FDCAN1,
        FLASH,
        IWDG,
        USART1,
        USART2,
        ..
    } = hal::init(config);

    // Every field is a plain integer and the record carries its own checksum,
    // so stale or random RAM only fails validation.
    let snapshot = unsafe { core::ptr::read_volatile(DURABLE.as_ptr()) };
    let (durable, path) = DurableState::resume(snapshot, cause);
    let durable: &'static mut DurableState = unsafe { DURABLE.write(durable) };

    let parameters = EepromConfig::new(hw::flash::ParameterPage::read(FLASH));
    let snapshot = ConfigSnapshot::load(&parameters);
    defmt::info!("module: {}", defmt::Display2Format(&snapshot));

    let watchdog = IndependentWatchdog::new(IWDG, hw::power::long_leash_micros());
    let parts = BoardParts::<Hardware> {
        outputs: hw::power::BoardOutputs::new(
            Output::new(PB0, Level::Low, Speed::Low),
            Output::new(PB1, Level::Low, Speed::Low),
            Output::new(PA8, Level::Low, Speed::Low),
        ),
        watchdog: hw::power::IwdgWatchdog::new(watchdog),
        cell_link: hw::cell_link::UartCellLink::new(Output::new(PA15, Level::Low, Speed::Low)),
        adc: hw::adc::SignalledAdc,
        storage: hw::DetachedStorage,
        clock: hw::UptimeClock::new(),
    };

    interrupt::USART3_4_5_6_LPUART1.set_priority(Priority::P1);
    let fault_spawner = FAULT_EXECUTOR.start(interrupt::USART3_4_5_6_LPUART1);
    fault_spawner
        .spawn(fault_task::run(PB4, EXTI4, PB5, EXTI5))
        .expect("failed to spawn fault task");

    let node = NODE.init(ModuleController::new(durable, &TRANSPORT, parts, snapshot));
    node.boot(path);

    spawner
        .spawn(node_task::run(node))
        .expect("failed to spawn node task");
    spawner
        .spawn(tick_task::run())
        .expect("failed to spawn tick task");
    spawner
        .spawn(can_task::run(&TRANSPORT, FDCAN1, PA11, PA12))
        .expect("failed to spawn CAN task");
    spawner
        .spawn(cell_task::run(USART1, PB6, PB7))
        .expect("failed to spawn cell link task");
    spawner
        .spawn(adc_task::run(ADC1, PA0, PA1, PA4, PA5, PA6))
        .expect("failed to spawn ADC task");
    spawner
        .spawn(console_task::run(USART2, PA2, PA3))
        .expect("failed to spawn console task");

    core::future::pending::<()>().await;
}
