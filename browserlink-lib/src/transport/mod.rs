pub mod addr;
pub mod params;
pub mod reader;
pub mod socket;

#[cfg(test)]
pub(crate) mod mock;

pub use addr::HostAddr;
pub use params::TransportParams;
pub use reader::{ResponseHandler, SocketReader, TextEncoding};
pub use socket::{SocketAdapter, TcpSocket};
