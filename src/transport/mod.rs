#[cfg(test)]
pub mod memory;
pub mod tcp;
pub mod traits;

pub use tcp::TcpTransport;
pub use traits::MessageTransport;
