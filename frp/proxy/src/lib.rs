mod kind;
mod manager;
mod splice;
mod transform;

pub use kind::{TcpProxy, UdpProxy, WorkConnSource};
pub use manager::{Error, ProxyHandle, ProxyManager};
pub use splice::{splice, SpliceError, SpliceStats};
pub use transform::{wrap_tunnel, TunnelStream};
