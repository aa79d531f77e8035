//! Protocol module containing the wire message types and the JSON codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_inbound, decode_outbound, encode_inbound, encode_outbound, ProtocolError};
pub use messages::*;
pub use sequence::CallbackCounter;
