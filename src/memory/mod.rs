//! The polymorphic memory-device-stack bus: devices are a tagged enum
//! held in an owned arena, addressed per-byte through [`bus::MemoryBus`].

pub mod bus;
pub mod device;

pub use bus::{DeviceId, MemoryBus};
pub use device::{shared_access, Access, ArrayDevice, MemoryDevice, SharedAccess, SingleDevice, WriteHandler};
