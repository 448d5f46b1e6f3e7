use embassy_futures::select::{select, select3};
use embassy_futures::yield_now;
use embassy_stm32::exti::ExtiInput;
use embassy_time::{Instant, Timer};
use node_core::button::ButtonInput;

use super::FirmwareNode;
use crate::hw::{EmbassyWake, SleepPlan};
use crate::status::{self, UpdateStatus};
use crate::telemetry::TelemetryLog;

/// Active-low push button on an EXTI line.
pub struct UserButton<'d> {
    input: ExtiInput<'d>,
}

impl<'d> UserButton<'d> {
    pub fn new(input: ExtiInput<'d>) -> Self {
        Self { input }
    }

    async fn wait_for_edge(&mut self) {
        self.input.wait_for_any_edge().await;
    }
}

impl ButtonInput for UserButton<'_> {
    fn is_pressed(&self) -> bool {
        self.input.is_low()
    }
}

#[embassy_executor::task]
pub async fn run(mut node: FirmwareNode, mut button: UserButton<'static>) -> ! {
    let mut wake = EmbassyWake::new();
    let mut log = TelemetryLog::new();

    loop {
        let report = node.run_iteration(&mut wake, &UpdateStatus, &button);
        log.drain(node.telemetry());
        if report.update_hold {
            defmt::trace!("node: update in progress, staying awake");
        }

        match wake.take_plan(Instant::now().as_ticks()) {
            SleepPlan::Yield => yield_now().await,
            SleepPlan::Until(at) => {
                select3(
                    Timer::at(Instant::from_ticks(at)),
                    button.wait_for_edge(),
                    status::wait_for_change(),
                )
                .await;
            }
            SleepPlan::UntilInterrupt => {
                select(button.wait_for_edge(), status::wait_for_change()).await;
            }
        }
    }
}
