//! Tuya serial MCU protocol engine.
//!
//! - [`frame`] wire framing and the streaming decoder
//! - [`datapoint`] datapoint values, report decoding and the store
//! - [`queue`] paced outbound command queue with reply gating
//! - [`handshake`] startup sequence of the standard firmware
//! - [`variant`] standard and low-power command sets
//! - [`session`] ties the above together for one link
pub mod datapoint;
pub mod frame;
pub mod handshake;
pub mod queue;
pub mod session;
pub mod time;
pub mod timers;
pub mod variant;

pub use datapoint::{Datapoint, DatapointStore, DatapointType, DatapointValue};
pub use frame::{Frame, FrameDecoder, FrameError};
pub use handshake::InitState;
pub use session::{Connectivity, ConnectivityFlags, LinkTuning, Session, SessionError, Transport};
pub use time::{LocalTime, SystemClock, TimeSource};
pub use variant::ProtocolVariant;
