//! Wire layer: the self-describing packed value format (`value`) and the
//! fixed-size message framing it rides inside (`message`). Together these
//! are the controller-side half of the bit-for-bit contract in spec §6.

pub mod message;
pub mod value;

pub use message::{RawMessage, BUF_SIZE};
pub use value::WireValue;
