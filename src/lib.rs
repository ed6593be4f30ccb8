pub mod body;
pub mod classifier;
pub mod config;
pub mod dialer;
pub mod error;
pub mod handler;
pub mod logging;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod status;
pub mod tls;

pub use config::Config;
pub use error::ProxyError;
pub use handler::TunnelHandler;
pub use server::RelayServer;
pub use status::ProxyStatus;
