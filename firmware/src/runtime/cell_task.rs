use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use crate::hw::cell_link::{REPLIES, REPLY_BUFFER, REQUESTS};

const CELL_LINK_BAUD: u32 = 250_000;

static mut UART_TX_BUFFER: [u8; 16] = [0; 16];
static mut UART_RX_BUFFER: [u8; REPLY_BUFFER] = [0; REPLY_BUFFER];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART1>;
});

#[embassy_executor::task]
pub async fn run(
    usart: Peri<'static, hal::peripherals::USART1>,
    tx_pin: Peri<'static, hal::peripherals::PB6>,
    rx_pin: Peri<'static, hal::peripherals::PB7>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CELL_LINK_BAUD;

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
        .expect("failed to initialize cell link UART")
    };
    let (mut uart_tx, mut uart_rx) = uart.split();

    let requests = async {
        loop {
            let word = REQUESTS.wait().await;
            if uart_tx.write_all(&word.to_le_bytes()).await.is_err()
                || uart_tx.flush().await.is_err()
            {
                defmt::warn!("cell link: request write failed");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    };

    let replies = async {
        let mut ingress = [0u8; 32];
        loop {
            match uart_rx.read(&mut ingress).await {
                Ok(count) if count > 0 => {
                    if REPLIES.try_write(&ingress[..count]).is_err() {
                        defmt::warn!("cell link: reply buffer full, dropped {} bytes", count);
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    defmt::warn!("cell link: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
            }
        }
    };

    join(requests, replies).await;
    loop {
        core::future::pending::<()>().await;
    }
}
