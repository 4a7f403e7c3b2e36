//! Host-side fakes for the bus, the PSTOP pin and the control loop's collaborators.

use std::cell::Cell;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
use embedded_hal_async::i2c::I2c;

use crate::control::{ActivityInput, BatteryMonitor, FanPwm, OutputSwitches, TemperatureProbes};
use crate::sc8812a::regs::I2C_ADDR;
use crate::shared_state::BatteryReading;

/// Register-file model of the converter chip.
///
/// A write sets the register pointer from its first byte and stores the rest
/// sequentially; a read continues from the pointer.
pub struct FakeChip {
    pub regs: [u8; 256],
    /// Every (register, value) stored, in order.
    pub writes: Vec<(u8, u8)>,
    /// NACK every transaction while set. Shared so a test can drop the link after the
    /// chip has been moved into a driver.
    pub nack_all: Rc<Cell<bool>>,
    /// Never complete a transaction.
    pub hang: bool,
    /// NACK reads that start at this register.
    pub fail_reads_of: Option<u8>,
    ptr: u8,
}

impl FakeChip {
    pub fn new() -> Self {
        Self {
            regs: [0; 256],
            writes: Vec::new(),
            nack_all: Rc::new(Cell::new(false)),
            hang: false,
            fail_reads_of: None,
            ptr: 0,
        }
    }

    /// Load a 10-bit ADC result into an MSB/LSB pair.
    pub fn set_adc(&mut self, msb_reg: u8, raw10: u16) {
        self.regs[msb_reg as usize] = (raw10 >> 2) as u8;
        self.regs[msb_reg as usize + 1] = ((raw10 & 0b11) << 6) as u8;
    }
}

impl ErrorType for FakeChip {
    type Error = ErrorKind;
}

impl I2c for FakeChip {
    async fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        if self.hang {
            core::future::pending::<()>().await;
        }
        if self.nack_all.get() || address != I2C_ADDR {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&reg, data)) = bytes.split_first() else { continue };
                    self.ptr = reg;
                    for &b in data {
                        self.regs[self.ptr as usize] = b;
                        self.writes.push((self.ptr, b));
                        self.ptr = self.ptr.wrapping_add(1);
                    }
                }
                Operation::Read(buf) => {
                    if self.fail_reads_of == Some(self.ptr) {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                    }
                    for b in buf.iter_mut() {
                        *b = self.regs[self.ptr as usize];
                        self.ptr = self.ptr.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakePin {
    pub high: bool,
}

impl embedded_hal::digital::ErrorType for FakePin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeBattery(pub Rc<Cell<BatteryReading>>);

impl BatteryMonitor for FakeBattery {
    fn read(&mut self) -> BatteryReading {
        self.0.get()
    }
}

#[derive(Clone, Default)]
pub struct FakeProbes(pub Rc<Cell<[f32; 4]>>);

impl TemperatureProbes for FakeProbes {
    fn read(&mut self) -> [f32; 4] {
        self.0.get()
    }
}

/// Reports `true` once per `press()`.
#[derive(Clone, Default)]
pub struct FakeButtons(pub Rc<Cell<bool>>);

impl FakeButtons {
    pub fn press(&self) {
        self.0.set(true);
    }
}

impl ActivityInput for FakeButtons {
    fn poll(&mut self) -> bool {
        self.0.replace(false)
    }
}

#[derive(Clone, Default)]
pub struct FakeFan(pub Rc<Cell<Option<u8>>>);

impl FanPwm for FakeFan {
    fn set_duty(&mut self, duty: u8) {
        self.0.set(Some(duty));
    }
}

#[derive(Clone, Default)]
pub struct FakeOutputs {
    pub usb: Rc<Cell<bool>>,
    pub ac: Rc<Cell<bool>>,
}

impl OutputSwitches for FakeOutputs {
    fn set_usb(&mut self, on: bool) {
        self.usb.set(on);
    }

    fn set_ac(&mut self, on: bool) {
        self.ac.set(on);
    }
}
