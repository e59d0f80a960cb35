//! # Raspberry Pi Register Bus
//!
//! SPI and GPIO access to an SX127x/RFM9x module wired to a Raspberry Pi,
//! built on the `rppal` crate.
//!
//! ## Typical Wiring (SPI0)
//! ```text
//! Pi Pin │ BCM GPIO │ RFM9x Pin │ Function
//! ───────┼──────────┼───────────┼─────────────
//! 19     │ GPIO 10  │ MOSI      │ SPI data out
//! 21     │ GPIO 9   │ MISO      │ SPI data in
//! 23     │ GPIO 11  │ SCK       │ SPI clock
//! 24     │ GPIO 8   │ NSS       │ Chip select (hardware CE0)
//! 18     │ GPIO 24  │ DIO0      │ Interrupt (input)
//! 22     │ GPIO 25  │ RESET     │ Reset (output, optional)
//! ```
//!
//! When `cs_pin` is configured the bus drives that pin around every exchange
//! in addition to the hardware slave select.

use crate::config::BusConfig;
use crate::radio::hal::{BusError, IrqSignal, RegisterBus, WRITE_BIT};
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use rppal::spi::{BitOrder, Bus, Mode, SlaveSelect, Spi};
use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration;

/// Register bus backed by the Raspberry Pi SPI controller
pub struct RaspberryPiBus {
    spi: Spi,
    cs_pin: Option<OutputPin>,
    reset_pin: Option<OutputPin>,
    /// Held so the async interrupt stays registered
    _irq_pin: InputPin,
}

impl RaspberryPiBus {
    /// Open the SPI bus and GPIO pins, pulse reset and arm the interrupt line.
    ///
    /// Returns the bus and the receiving end of the interrupt channel.
    pub fn open(config: &BusConfig) -> Result<(Self, Receiver<IrqSignal>), BusError> {
        let bus = match config.spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            other => {
                return Err(BusError::Spi(format!(
                    "Invalid SPI bus {}, only 0 and 1 are supported",
                    other
                )))
            }
        };

        let spi = Spi::new(bus, SlaveSelect::Ss0, config.spi_speed_hz, Mode::Mode0)
            .map_err(|e| BusError::Spi(format!("SPI initialization failed: {}", e)))?;
        spi.set_bit_order(BitOrder::MsbFirst)
            .map_err(|e| BusError::Spi(format!("SPI bit order: {}", e)))?;

        let gpio = Gpio::new().map_err(|e| BusError::Gpio(format!("GPIO init failed: {}", e)))?;

        let cs_pin = match config.cs_pin {
            Some(pin) => {
                let mut out = gpio
                    .get(pin)
                    .map_err(|e| BusError::Gpio(format!("CS pin {}: {}", pin, e)))?
                    .into_output();
                out.set_high();
                Some(out)
            }
            None => None,
        };

        let reset_pin = match config.reset_pin {
            Some(pin) => Some(
                gpio.get(pin)
                    .map_err(|e| BusError::Gpio(format!("Reset pin {}: {}", pin, e)))?
                    .into_output(),
            ),
            None => None,
        };

        let (tx, rx) = super::irq_channel();
        let irq_pin = Self::arm_interrupt(&gpio, config.interrupt_pin, tx)?;

        let mut radio_bus = Self {
            spi,
            cs_pin,
            reset_pin,
            _irq_pin: irq_pin,
        };
        radio_bus.reset();

        log::info!(
            "Raspberry Pi bus ready: SPI{} @ {} Hz, IRQ GPIO {}",
            config.spi_bus,
            config.spi_speed_hz,
            config.interrupt_pin
        );

        Ok((radio_bus, rx))
    }

    /// Pulse the reset line (active low)
    pub fn reset(&mut self) {
        if let Some(ref mut reset_pin) = self.reset_pin {
            log::debug!("Resetting radio");
            reset_pin.set_low();
            thread::sleep(Duration::from_millis(10));
            reset_pin.set_high();
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn arm_interrupt(
        gpio: &Gpio,
        pin: u8,
        tx: Sender<IrqSignal>,
    ) -> Result<InputPin, BusError> {
        let mut input = gpio
            .get(pin)
            .map_err(|e| BusError::Gpio(format!("IRQ pin {}: {}", pin, e)))?
            .into_input();

        input
            .set_async_interrupt(Trigger::RisingEdge, move |_level| {
                if tx.send(IrqSignal).is_err() {
                    log::warn!("IRQ channel closed for GPIO {}", pin);
                }
            })
            .map_err(|e| BusError::Gpio(format!("Interrupt setup failed: {}", e)))?;

        Ok(input)
    }

    fn select(&mut self) {
        if let Some(ref mut cs) = self.cs_pin {
            cs.set_low();
        }
    }

    fn deselect(&mut self) {
        if let Some(ref mut cs) = self.cs_pin {
            cs.set_high();
        }
    }
}

impl RegisterBus for RaspberryPiBus {
    fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(1 + data.len());
        frame.push(register | WRITE_BIT);
        frame.extend_from_slice(data);

        self.select();
        let result = self.spi.write(&frame);
        self.deselect();

        result
            .map(|_| log::trace!("Register write 0x{:02X}, {} bytes", register, data.len()))
            .map_err(|e| BusError::Spi(format!("Write register 0x{:02X} failed: {}", register, e)))
    }

    fn read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        let mut out = vec![0u8; 1 + buf.len()];
        out[0] = register & !WRITE_BIT;
        let mut input = vec![0u8; out.len()];

        self.select();
        let result = self.spi.transfer(&mut input, &out);
        self.deselect();

        result.map_err(|e| {
            BusError::Spi(format!("Read register 0x{:02X} failed: {}", register, e))
        })?;
        buf.copy_from_slice(&input[1..]);
        Ok(())
    }
}
