pub mod message;
pub mod types;

pub use message::{BusMessage, GranuleMessage, MessageError, outbound_data};
pub use types::{Instrument, Platform};
