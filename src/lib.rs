//! Control core of an SC8812A based power bank.
//!
//! [`sc8812a`] is the register-level driver. On top of it sit the mode controller,
//! the MPPT engine, the fan controller and the auto power-off monitor, tied together by
//! [`control::ControlLoop`].
#![cfg_attr(not(test), no_std)]

// must stay first: the logging macros are textually scoped
#[macro_use]
mod fmt;

pub mod auto_power_off;
pub mod battery;
pub mod config;
pub mod control;
pub mod fan;
pub mod mppt;
pub mod power_mode;
pub mod sc8812a;
pub mod scheduler;
pub mod settings;
pub mod shared_state;

#[cfg(test)]
mod testing;

pub use control::{ControlLoop, ShutdownCause};
pub use power_mode::PowerMode;
pub use sc8812a::Sc8812a;
pub use settings::ControlConfig;
