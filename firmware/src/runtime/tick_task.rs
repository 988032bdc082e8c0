use embassy_time::{Duration, Ticker};
use module_core::scheduler::TICK;

use super::{NodeInput, post};

#[embassy_executor::task]
pub async fn run() -> ! {
    let period = u64::try_from(TICK.as_millis()).unwrap_or(100);
    let mut ticker = Ticker::every(Duration::from_millis(period));
    loop {
        ticker.next().await;
        post(NodeInput::Tick);
    }
}
