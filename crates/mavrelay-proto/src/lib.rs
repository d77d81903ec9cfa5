pub mod codec;
pub mod envelope;
pub mod registry;
pub mod status;

pub use codec::{encode, parse, serialize, CodecError};
pub use envelope::{Envelope, Field, Payload, MAX_SAFE_INTEGER};
pub use registry::{lookup, Lookup, MessageType};
pub use status::{ConfigReport, PortStatus};
