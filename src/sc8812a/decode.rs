//! Human-readable logging of the SC8812A status register.

use super::types::Status;

impl Status {
    /// Names of the flags that are set, in bit order from AC_OK down to EOC.
    pub fn set_flags(&self) -> impl Iterator<Item = &'static str> {
        [
            (self.ac_ok, "AC_OK (adapter present)"),
            (self.input_detected, "INDET (input detected)"),
            (self.vbus_short, "VBUS_SHORT (output short)"),
            (self.over_temperature, "OTP (over temperature)"),
            (self.end_of_charge, "EOC (end of charge)"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
    }
}

/// REG0x17 holds live bits, not latched ones: log whatever is set right now.
pub fn log_status(status: &Status) {
    info!("STATUS = 0x{:02X}", status.raw);
    let mut idle = true;
    for name in status.set_flags() {
        info!("  - {}", name);
        idle = false;
    }
    if idle {
        info!("  no flags set");
    }
}
