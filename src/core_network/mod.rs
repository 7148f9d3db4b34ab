pub mod network;

pub use network::{connect, listen, listen_range, recv_line, send_all, AddrFamily, NetError};
