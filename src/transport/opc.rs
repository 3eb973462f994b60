//! Open Pixel Control over TCP, one connection per configured server.

use super::Transport;
use crate::config::OpcServer;
use crate::error::TransportError;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct OpcConnection {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl OpcConnection {
    pub fn new(server: &OpcServer, timeout: Duration) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            timeout,
            stream: None,
        }
    }

    /// Try every resolved address in turn.
    fn connect(&self) -> Result<TcpStream, TransportError> {
        let addresses = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Resolve(format!("{}: {e}", self.describe())))?;

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses");
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connect to {address} failed: {e}");
                    last_error = e;
                }
            }
        }

        Err(last_error.into())
    }
}

impl Transport for OpcConnection {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.connect()?;
        // Servers never answer; only the send side is used.
        let _ = stream.shutdown(Shutdown::Read);
        let _ = stream.set_nodelay(true);
        stream.set_write_timeout(Some(self.timeout))?;

        info!("Connected to OPC server {}", self.describe());
        self.stream = Some(stream);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let Some(stream) = &mut self.stream else {
            return Err(TransportError::NotOpen);
        };

        if let Err(e) = stream.write_all(frame) {
            warn!("Error sending to {}: {e}", self.describe());
            self.close();
            return Err(e.into());
        }

        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Write);
            debug!("Closed OPC connection {}", self.describe());
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connections indexed like the configured servers.
pub struct OpcPool {
    connections: Vec<Box<dyn Transport>>,
}

impl OpcPool {
    pub fn new(servers: &[OpcServer], timeout: Duration) -> Self {
        Self {
            connections: servers
                .iter()
                .map(|server| Box::new(OpcConnection::new(server, timeout)) as Box<dyn Transport>)
                .collect(),
        }
    }

    pub fn from_transports(connections: Vec<Box<dyn Transport>>) -> Self {
        Self { connections }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Open every connection. True if at least one is usable afterwards.
    pub fn open(&mut self) -> bool {
        let mut opened = false;
        for connection in &mut self.connections {
            match connection.open() {
                Ok(()) => opened = true,
                Err(e) => warn!("Failed to connect to {}: {e}", connection.describe()),
            }
        }
        opened
    }

    pub fn send(&mut self, server: usize, frame: &[u8]) -> Result<(), TransportError> {
        self.connections
            .get_mut(server)
            .ok_or(TransportError::NotOpen)?
            .send(frame)
    }

    pub fn close(&mut self) {
        for connection in &mut self.connections {
            connection.close();
        }
    }

    pub fn open_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_open()).count()
    }
}
