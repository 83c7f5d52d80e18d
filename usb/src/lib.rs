pub use rusb;

pub mod chip;
pub mod connection;
pub mod error;

pub mod device;

pub const VID_PROLIFIC: u16 = 0x067b;

pub const PID_PL2303: u16 = 0x2303;
pub const PID_PL2303_GC: u16 = 0x23a3;
pub const PID_PL2303_GB: u16 = 0x23b3;
pub const PID_PL2303_GT: u16 = 0x23c3;
pub const PID_PL2303_GL: u16 = 0x23d3;
pub const PID_PL2303_GE: u16 = 0x23e3;
pub const PID_PL2303_GS: u16 = 0x23f3;
