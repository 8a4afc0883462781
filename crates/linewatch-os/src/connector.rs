use std::io::{self, Read as _, Write as _};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use embedded_io::{ErrorType, Read, ReadReady, Write};

use linewatch::dispatcher::Connector;
use linewatch::error::{Error, ErrorKind, Result};

use tracing::debug;

/// Default bound on connection attempts and writes.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens outbound `TCP` connections.
///
/// Connection attempts and writes are bounded by a timeout, and reads are
/// only performed once [`ReadReady`] reports pending data or a closed peer.
///
/// Name resolution blocks, so the addresses of the last endpoint are kept
/// and reused until a connection to them fails.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
    resolved: Option<Resolved>,
}

#[derive(Debug, Clone)]
struct Resolved {
    host: String,
    port: u16,
    addresses: Vec<SocketAddr>,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnector {
    /// Creates a [`TcpConnector`] with [`DEFAULT_CONNECT_TIMEOUT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
            resolved: None,
        }
    }

    /// Sets the connection and write timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn addresses(&mut self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        if let Some(resolved) = &self.resolved
            && resolved.host == host
            && resolved.port == port
        {
            return Ok(resolved.addresses.clone());
        }

        let addresses = (host, port).to_socket_addrs()?.collect::<Vec<_>>();
        debug!("Resolved {host}:{port} to {addresses:?}");
        self.resolved = Some(Resolved {
            host: host.into(),
            port,
            addresses: addresses.clone(),
        });
        Ok(addresses)
    }

    fn open(&mut self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_error = None;
        for address in self.addresses(host, port)? {
            match TcpStream::connect_timeout(&address, self.timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    debug!("Connected to {address}");
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        // The host may have moved.
        self.resolved = None;
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no address found for the host")
        }))
    }
}

impl Connector for TcpConnector {
    type Connection = TcpConnection;

    fn connect(&mut self, host: &str, port: u16) -> Result<Self::Connection> {
        self.open(host, port).map(TcpConnection).map_err(|e| {
            Error::new(
                ErrorKind::Connection,
                format!("Unable to connect to {host}:{port}: {e}"),
            )
        })
    }
}

/// An outbound `TCP` connection.
#[derive(Debug)]
pub struct TcpConnection(TcpStream);

impl ErrorType for TcpConnection {
    type Error = io::Error;
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl ReadReady for TcpConnection {
    fn read_ready(&mut self) -> io::Result<bool> {
        self.0.set_nonblocking(true)?;
        let mut byte = [0; 1];
        // A zero-length peek means the peer closed the connection, which the
        // following read reports.
        let ready = match self.0.peek(&mut byte) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        };
        self.0.set_nonblocking(false)?;
        ready
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::time::Duration;

    use linewatch::dispatcher::{Connector, Dispatcher};
    use linewatch::error::ErrorKind;

    use super::TcpConnector;

    fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("Condition not reached");
    }

    #[test]
    fn notification_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut dispatcher = Dispatcher::new(TcpConnector::new());

        dispatcher.request(&format!("http://127.0.0.1:{port}/notify?GPIO2=OPEN"));
        assert!(dispatcher.is_busy());

        let (mut peer, _) = listener.accept().unwrap();
        let mut request = [0; 256];
        let read = peer.read(&mut request).unwrap();
        let request = String::from_utf8_lossy(&request[..read]).into_owned();
        assert!(request.starts_with("GET /notify?GPIO2=OPEN HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Host: 127.0.0.1:{port}\r\n")));

        dispatcher.poll();
        assert!(dispatcher.is_busy());

        peer.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
        drop(peer);

        wait_until(|| {
            dispatcher.poll();
            !dispatcher.is_busy()
        });
        assert_eq!(dispatcher.stats().completed, 1);
    }

    #[test]
    fn resolution_kept_until_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut connector = TcpConnector::new().timeout(Duration::from_millis(200));

        let _connection = connector.connect("127.0.0.1", port).unwrap();
        let resolved = connector.resolved.clone().unwrap();
        assert_eq!((resolved.host.as_str(), resolved.port), ("127.0.0.1", port));
        assert_eq!(resolved.addresses, [listener.local_addr().unwrap()]);

        drop(listener);
        assert!(connector.connect("127.0.0.1", port).is_err());
        assert!(connector.resolved.is_none());
    }

    #[test]
    fn refused_connection() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let error = TcpConnector::new()
            .timeout(Duration::from_millis(200))
            .connect("127.0.0.1", port)
            .err()
            .map(|e| e.kind());

        assert_eq!(error, Some(ErrorKind::Connection));
    }
}
