//! Admin bus protocol: the typed message vocabulary plus the device and
//! map negotiation state machines layered on top of it (spec §4.C/D/E).

pub mod device_fsm;
pub mod map_fsm;
pub mod messages;

pub use device_fsm::{DeviceFsm, DeviceState};
pub use map_fsm::{MapFsm, MapState};
pub use messages::AdminMessage;
