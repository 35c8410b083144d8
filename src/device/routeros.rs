//! TCP connector for the RouterOS API.
//!
//! Each [`RouterOsConnector::connect`] call is one attempt: resolve, open a
//! socket with the configured timeout, then log in with the post-6.43
//! plaintext `/login` exchange.

use crate::config::DeviceConfig;
use crate::device::protocol::{read_response, write_sentence, Command, Entry, Response};
use crate::device::session::{DeviceConnector, DeviceTransport};
use crate::IpWardenError;
use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

/// Opens authenticated API sessions over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterOsConnector;

impl RouterOsConnector {
    /// New connector.
    pub fn new() -> Self {
        Self
    }

    fn open_stream(config: &DeviceConfig) -> Result<TcpStream, IpWardenError> {
        let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| {
                IpWardenError::DeviceIo(format!("Failed to resolve {}: {}", config.host, e))
            })?
            .collect();

        let mut last_error = format!("no addresses for {}", config.host);
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(config.connect_timeout))
                        .and_then(|_| stream.set_write_timeout(Some(config.connect_timeout)))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| IpWardenError::DeviceIo(e.to_string()))?;
                    return Ok(stream);
                }
                Err(e) => last_error = format!("{}: {}", addr, e),
            }
        }
        Err(IpWardenError::DeviceIo(last_error))
    }
}

impl DeviceConnector for RouterOsConnector {
    fn connect(&self, config: &DeviceConfig) -> Result<Box<dyn DeviceTransport>, IpWardenError> {
        let stream = Self::open_stream(config)?;
        let mut transport = RouterOsTransport::new(stream)?;

        if let Err(e) = transport.login(&config.user, &config.password) {
            transport.close();
            return Err(e);
        }
        Ok(Box::new(transport))
    }
}

/// Authenticated API connection.
pub struct RouterOsTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    open: bool,
}

impl RouterOsTransport {
    fn new(stream: TcpStream) -> Result<Self, IpWardenError> {
        let writer = stream
            .try_clone()
            .map_err(|e| IpWardenError::DeviceIo(format!("Failed to clone socket: {}", e)))?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            open: true,
        })
    }

    fn call(&mut self, command: &Command) -> Result<Response, IpWardenError> {
        if !self.open {
            return Err(IpWardenError::DeviceIo("transport closed".to_string()));
        }
        write_sentence(&mut self.writer, &command.words())?;
        read_response(&mut self.reader, &command.path)
    }

    fn login(&mut self, user: &str, password: &str) -> Result<(), IpWardenError> {
        let command = Command::new("/login")
            .attr("name", user)
            .attr("password", password);
        let response = self.call(&command)?;

        // pre-6.43 firmware answers with an MD5 challenge instead
        if response.done.get("ret").is_some() {
            return Err(IpWardenError::DeviceProtocol(
                "device requested legacy challenge login, which is not supported".to_string(),
            ));
        }
        Ok(())
    }
}

impl DeviceTransport for RouterOsTransport {
    fn execute(&mut self, command: &Command) -> Result<Vec<Entry>, IpWardenError> {
        let response = self.call(command)?;
        if let Some(ret) = response.done.get("ret") {
            tracing::trace!(command = %command.path, ret, "device command returned");
        }
        Ok(response.entries)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.writer.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for RouterOsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn refused_connection_is_io_error() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = DeviceConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_millis(500),
            ..DeviceConfig::disabled()
        }
        .with_retry(RetryPolicy::immediate(1));

        let result = RouterOsConnector::new().connect(&config);
        assert!(matches!(result, Err(IpWardenError::DeviceIo(_))));
    }

    #[test]
    fn unresolvable_host_is_io_error() {
        let config = DeviceConfig {
            host: "invalid host name".to_string(),
            ..DeviceConfig::disabled()
        };
        assert!(matches!(
            RouterOsConnector::new().connect(&config),
            Err(IpWardenError::DeviceIo(_))
        ));
    }
}
