use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::Pull;
use embassy_stm32::i2c::{self, I2c};
use node_core::clock::VirtualClock;
use node_core::config::NodeConfig;
use node_core::node::NodeLoop;

use crate::hw::sensor::Shtc3;
use crate::hw::{EmbassyTicks, LogDisplay, StatusRadio, TICKS_PER_MICRO};

mod node_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Concrete loop type driven by the node task.
pub(super) type FirmwareNode = NodeLoop<EmbassyTicks, Shtc3<'static>, LogDisplay, StatusRadio>;

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        I2C1,
        PB6,
        PB7,
        PB5,
        EXTI5,
        ..
    } = hal::init(config);

    let bus = I2c::new_blocking(I2C1, PB6, PB7, i2c::Config::default());
    let button = ExtiInput::new(PB5, EXTI5, Pull::Up);

    let node_config = NodeConfig::new();
    let clock = VirtualClock::new(EmbassyTicks, TICKS_PER_MICRO);
    let node = FirmwareNode::new(
        clock,
        Shtc3::new(bus, node_config.calibration),
        LogDisplay,
        StatusRadio,
        node_config,
    );

    defmt::info!(
        "node: sampling every {}us, display every {}us",
        node_config.sampling_interval_us(),
        node_config.display_interval_us()
    );

    spawner
        .spawn(node_task::run(node, node_task::UserButton::new(button)))
        .expect("failed to spawn node task");

    core::future::pending::<()>().await;
}
