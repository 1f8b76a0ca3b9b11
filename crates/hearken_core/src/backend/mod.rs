//! Audio Backends
//!
//! A backend turns a [`CaptureRequest`] into running streams in two steps:
//! `acquire` claims the devices, `wire` connects them to a signal chain and
//! starts them. The split lets the session throw away a late acquisition
//! without ever starting audio.
//!
//! Everything returned by a backend lives and dies on the session thread,
//! so only the backend itself has to be `Send + Sync`.

mod cpal_host;
mod simulated;

pub use self::cpal_host::CpalBackend;
pub use self::simulated::{AcquisitionGate, SimulatedBackend};

use hearken_dsp::SignalChain;

use crate::device::{CaptureRequest, SessionInfo};
use crate::error::DeviceError;

/// Source of input and output streams
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Claim the default input and output for `request`
    fn acquire(&self, request: &CaptureRequest) -> Result<Box<dyn AcquiredDevices>, DeviceError>;
}

/// Devices that have been claimed but carry no audio yet
pub trait AcquiredDevices {
    /// Negotiated format, used to build the chain
    fn describe(&self) -> SessionInfo;

    /// Route input through `chain` to the output and start both streams
    fn wire(self: Box<Self>, chain: SignalChain) -> Result<Box<dyn LiveStreams>, DeviceError>;
}

/// Running streams
pub trait LiveStreams {
    /// Stop and drop the streams. The chain goes with them.
    fn release(self: Box<Self>) -> Result<(), DeviceError>;
}
