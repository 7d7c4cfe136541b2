//! Network subsystem
//!
//! Owns the listening socket clients connect to. Bridging traffic over the
//! socket is handled elsewhere; bring-up only needs the socket bound before
//! the daemon reports itself running, and released on teardown.

use std::net::TcpListener;
use thiserror::Error;
use tracing::{debug, info};

pub const LOG_TARGET: &str = module_path!();

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait NetworkSubsystem {
    fn init(&mut self) -> Result<(), NetworkError>;
    fn exit(&mut self);
}

pub struct TcpNetwork {
    bind_addr: String,
    listener: Option<TcpListener>,
}

impl TcpNetwork {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            listener: None,
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

impl NetworkSubsystem for TcpNetwork {
    fn init(&mut self) -> Result<(), NetworkError> {
        let listener = TcpListener::bind(&self.bind_addr).map_err(|source| NetworkError::Bind {
            addr: self.bind_addr.clone(),
            source,
        })?;

        match listener.local_addr() {
            Ok(addr) => info!("Listening on {}", addr),
            Err(_) => info!("Listening on {}", self.bind_addr),
        }

        self.listener = Some(listener);
        Ok(())
    }

    fn exit(&mut self) {
        if self.listener.take().is_some() {
            debug!("Closed listening socket {}", self.bind_addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_release() {
        let mut network = TcpNetwork::new("127.0.0.1:0");
        network.init().unwrap();
        let addr = network.local_addr().expect("bound address");
        assert_ne!(addr.port(), 0);

        network.exit();
        assert!(network.local_addr().is_none());

        // The port is free again
        TcpListener::bind(addr).unwrap();
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let mut network = TcpNetwork::new(addr.to_string());
        let err = network.init().unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()));
    }
}
