pub mod client;
pub mod protocol;
pub mod session;

pub use client::{RegisterReader, DEFAULT_UNIT_ID};
pub use protocol::{decode_read_response, encode_read_request, encode_read_response, ReadResponse};
pub use session::{ModbusTransport, TcpSession, TransactionCounter};
