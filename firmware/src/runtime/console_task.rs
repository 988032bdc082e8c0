use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use super::{CONSOLE_OUT, NodeInput, post};
use crate::console::LineAssembler;

const CONSOLE_BAUD: u32 = 115_200;
const PROMPT: &[u8] = b"> ";

static mut UART_TX_BUFFER: [u8; 256] = [0; 256];
static mut UART_RX_BUFFER: [u8; 64] = [0; 64];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART2_LPUART2 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART2>;
});

#[embassy_executor::task]
pub async fn run(
    usart: Peri<'static, hal::peripherals::USART2>,
    tx_pin: Peri<'static, hal::peripherals::PA2>,
    rx_pin: Peri<'static, hal::peripherals::PA3>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_BAUD;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize console UART")
    };
    let (mut uart_tx, mut uart_rx) = uart.split();

    let input = async {
        let mut assembler = LineAssembler::new();
        let mut ingress = [0u8; 16];
        loop {
            match uart_rx.read(&mut ingress).await {
                Ok(count) => {
                    for byte in &ingress[..count] {
                        match assembler.ingest(*byte) {
                            Ok(Some(line)) => post(NodeInput::Console(line)),
                            Ok(None) => {}
                            Err(err) => {
                                defmt::warn!("console: {}", defmt::Display2Format(&err));
                            }
                        }
                    }
                }
                Err(_) => {
                    defmt::warn!("console: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
            }
        }
    };

    let output = async {
        let mut egress = [0u8; 64];
        if uart_tx.write_all(PROMPT).await.is_err() {
            defmt::warn!("console: UART write error");
        }
        loop {
            let count = CONSOLE_OUT.read(&mut egress).await;
            let mut result = uart_tx.write_all(&egress[..count]).await;
            if result.is_ok() && CONSOLE_OUT.is_empty() {
                result = uart_tx.write_all(PROMPT).await;
            }
            if result.is_err() {
                defmt::warn!("console: UART write error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    };

    join(input, output).await;
    loop {
        core::future::pending::<()>().await;
    }
}
