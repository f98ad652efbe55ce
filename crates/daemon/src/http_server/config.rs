use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    // log level for http tracing
    pub log_level: tracing::Level,
}

impl Config {
    pub fn new(listen_addr: SocketAddr) -> Self {
        tracing::info!(%listen_addr, "creating HTTP server config");
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
        }
    }
}
