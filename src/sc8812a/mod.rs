pub mod regs;
pub mod types;
pub mod device;
pub mod decode;

pub use device::Sc8812a;
pub use types::{CalibrationProfile, Channel, Direction, Error, Status};
