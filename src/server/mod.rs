//! UDP serving layer

pub mod udp;

pub use udp::UdpServer;
