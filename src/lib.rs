//! dnstweak - answer chosen hostnames locally, forward everything else.
//!
//! Overrides are A-record only. While running, the responder can take over
//! the system resolver file and puts it back on shutdown.

pub mod attribution;
pub mod error;
pub mod handler;
pub mod overrides;
pub mod proxy;
pub mod resolv_conf;
pub mod resolver;
pub mod shutdown;
pub mod transport;
pub mod upstream;

pub use error::{Error, Result};
pub use overrides::OverrideTable;
pub use proxy::{Proxy, ProxyConfig};
