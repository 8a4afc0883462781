//! The outbound notification dispatcher.
//!
//! At most one request is in flight at any time. A request made while busy
//! is parked in a single pending slot, replacing whatever was parked there:
//! once the in-flight exchange ends, only the most recent request is sent.
//!
//! Requests are plain `HTTP/1.1` `GET`s carrying `Connection: close`. The
//! peer closing the connection is the only signal that an exchange is over.

use alloc::format;

use core::fmt::Write as _;

use embedded_io::{Read, ReadReady, Write};

use heapless::String;

use log::{debug, error, info, warn};

use crate::MAX_LINES;
use crate::error::{Error, ErrorKind, Result};
use crate::store::MAX_NOTIFY_URL_LEN;

/// Default `HTTP` port.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Maximum length of one `&GPIO<n>=<STATE>` pair appended to a notification
/// `URL`.
pub const MAX_CHANGE_LEN: usize = 16;

/// Maximum length of a dispatched `URL`: the longest stored `URL`, a path
/// separator and one pair for each of [`MAX_LINES`] lines.
pub const MAX_URL_LEN: usize = MAX_NOTIFY_URL_LEN + 1 + MAX_LINES * MAX_CHANGE_LEN;

/// A dispatched `URL`.
pub type UrlString = String<MAX_URL_LEN>;

// Size of each response read.
const RESPONSE_CHUNK_SIZE: usize = 128;

// Maximum number of response reads in a single poll.
const MAX_CHUNKS_PER_POLL: usize = 8;

// Size of the request head: the path and the authority, which together never
// exceed the URL, plus the fixed request text.
const REQUEST_SIZE: usize = MAX_URL_LEN + 64;

/// The destination of a notification `URL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    /// Host and optional port, as written in the `URL`.
    pub authority: &'a str,
    /// Host name or address.
    pub host: &'a str,
    /// Port number.
    pub port: u16,
    /// Request path, always starting with `/`.
    pub path: &'a str,
}

impl<'a> Target<'a> {
    /// Splits an absolute `URL` into its [`Target`].
    ///
    /// The host is what follows `://` up to the next `/`, or the whole
    /// remainder when there is no `/`. The path starts at that `/` and
    /// defaults to `/`.
    ///
    /// # Errors
    ///
    /// - The host is empty
    /// - The port is not a number
    pub fn parse(url: &'a str) -> Result<Self> {
        let remainder = url.split_once("://").map_or(url, |(_, rest)| rest);

        let (authority, path) = match remainder.find('/') {
            Some(index) => remainder.split_at(index),
            None => (remainder, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    Error::new(
                        ErrorKind::InvalidUrl,
                        format!("Invalid port in `{url}`: {e}"),
                    )
                })?;
                (host, port)
            }
            None => (authority, DEFAULT_HTTP_PORT),
        };

        if host.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidUrl,
                format!("No host found in `{url}`"),
            ));
        }

        Ok(Self {
            authority,
            host,
            port,
            path,
        })
    }

    fn request(&self) -> Result<String<REQUEST_SIZE>> {
        let mut request = String::new();
        write!(
            request,
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.path, self.authority
        )
        .map_err(|_| Error::new(ErrorKind::Capacity, "The request does not fit its buffer"))?;
        Ok(request)
    }
}

/// Opens outbound connections.
///
/// Implementations must not block indefinitely: a connection attempt either
/// completes or fails within a bounded time.
pub trait Connector {
    /// An open connection.
    ///
    /// [`ReadReady`] must report `true` both when bytes are available and
    /// when the peer has closed the connection, so that the following read
    /// returns `0`.
    type Connection: Read + Write + ReadReady;

    /// Opens a connection to `host` on `port`.
    ///
    /// # Errors
    ///
    /// The host cannot be resolved or reached.
    fn connect(&mut self, host: &str, port: u16) -> Result<Self::Connection>;
}

/// Counters describing the dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests written to a connection.
    pub sent: u32,
    /// Requests dropped because of an invalid `URL` or a connection failure.
    pub failed: u32,
    /// Pending requests replaced by a newer one before being sent.
    pub coalesced: u32,
    /// Exchanges closed by the peer.
    pub completed: u32,
}

enum DispatchState<C> {
    Idle,
    Busy { connection: C, url: UrlString },
}

/// A one-request-at-a-time notification dispatcher.
pub struct Dispatcher<K: Connector> {
    connector: K,
    state: DispatchState<K::Connection>,
    pending: Option<UrlString>,
    stats: DispatchStats,
}

impl<K: Connector> Dispatcher<K> {
    /// Creates an idle [`Dispatcher`].
    #[must_use]
    pub const fn new(connector: K) -> Self {
        Self {
            connector,
            state: DispatchState::Idle,
            pending: None,
            stats: DispatchStats {
                sent: 0,
                failed: 0,
                coalesced: 0,
                completed: 0,
            },
        }
    }

    /// Requests a notification to `url`.
    ///
    /// When idle, the request is sent at once. When busy, it replaces the
    /// pending request, if any. This call never blocks on the network beyond
    /// the bounded connection attempt of the [`Connector`].
    pub fn request(&mut self, url: &str) {
        let Ok(url) = UrlString::try_from(url) else {
            error!("Notification URL longer than {MAX_URL_LEN} bytes, dropped");
            self.stats.failed = self.stats.failed.wrapping_add(1);
            return;
        };

        match self.state {
            DispatchState::Idle => self.start(url),
            DispatchState::Busy { .. } => {
                if let Some(replaced) = self.pending.replace(url) {
                    debug!("Pending notification to `{replaced}` replaced");
                    self.stats.coalesced = self.stats.coalesced.wrapping_add(1);
                }
            }
        }
    }

    /// Advances the in-flight exchange.
    ///
    /// Reads only the response bytes that are already available, up to a
    /// bounded amount. Once the peer closes the connection the dispatcher
    /// becomes idle and immediately sends the pending request, if any.
    pub fn poll(&mut self) {
        let closed = match &mut self.state {
            DispatchState::Idle => return,
            DispatchState::Busy { connection, url } => Self::drain(connection, url),
        };

        if !closed {
            return;
        }

        if let DispatchState::Busy { url, .. } =
            core::mem::replace(&mut self.state, DispatchState::Idle)
        {
            info!("Notification to `{url}` completed");
        }
        self.stats.completed = self.stats.completed.wrapping_add(1);

        if let Some(url) = self.pending.take() {
            self.start(url);
        }
    }

    /// Checks whether a request is in flight.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self.state, DispatchState::Busy { .. })
    }

    /// Returns the in-flight `URL`.
    #[must_use]
    pub fn in_flight(&self) -> Option<&str> {
        match &self.state {
            DispatchState::Idle => None,
            DispatchState::Busy { url, .. } => Some(url.as_str()),
        }
    }

    /// Returns the pending `URL`.
    #[must_use]
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Returns the dispatcher counters.
    #[must_use]
    pub const fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Returns the [`Connector`].
    #[must_use]
    pub const fn connector(&self) -> &K {
        &self.connector
    }

    /// Drops the in-flight exchange and the pending request.
    pub fn reset(&mut self) {
        self.state = DispatchState::Idle;
        self.pending = None;
    }

    fn start(&mut self, url: UrlString) {
        match self.open(&url) {
            Ok(connection) => {
                debug!("Notification to `{url}` sent");
                self.state = DispatchState::Busy { connection, url };
                self.stats.sent = self.stats.sent.wrapping_add(1);
            }
            Err(e) => {
                warn!("Notification to `{url}` dropped: {e}");
                self.stats.failed = self.stats.failed.wrapping_add(1);
            }
        }
    }

    fn open(&mut self, url: &str) -> Result<K::Connection> {
        let target = Target::parse(url)?;
        let request = target.request()?;

        let mut connection = self.connector.connect(target.host, target.port)?;
        connection
            .write_all(request.as_bytes())
            .and_then(|()| connection.flush())
            .map_err(|e| {
                Error::new(
                    ErrorKind::Connection,
                    format!("Unable to write the request: {e:?}"),
                )
            })?;

        Ok(connection)
    }

    // Returns whether the connection has been closed.
    fn drain(connection: &mut K::Connection, url: &str) -> bool {
        let mut buffer = [0; RESPONSE_CHUNK_SIZE];

        for _ in 0..MAX_CHUNKS_PER_POLL {
            match connection.read_ready() {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!("Connection for `{url}` failed: {e:?}");
                    return true;
                }
            }

            match connection.read(&mut buffer) {
                Ok(0) => return true,
                Ok(read) => debug!(
                    "Response from `{url}`: {}",
                    core::str::from_utf8(&buffer[..read]).unwrap_or("<binary>")
                ),
                Err(e) => {
                    warn!("Connection for `{url}` failed: {e:?}");
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::collections::VecDeque;
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::vec::Vec;

    use core::cell::RefCell;

    use embedded_io::{ErrorKind as IoErrorKind, ErrorType, Read, ReadReady, Write};

    use crate::error::{Error, ErrorKind, Result};

    use super::{Connector, DEFAULT_HTTP_PORT, DispatchStats, Dispatcher, MAX_URL_LEN, Target};

    #[derive(Default)]
    struct Exchange {
        host: String,
        port: u16,
        written: Vec<u8>,
        response: VecDeque<u8>,
        closed: bool,
    }

    /// A connection whose peer is driven by the test.
    #[derive(Clone)]
    pub(crate) struct FakeConnection(Rc<RefCell<Exchange>>);

    impl ErrorType for FakeConnection {
        type Error = IoErrorKind;
    }

    impl Read for FakeConnection {
        fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
            let mut exchange = self.0.borrow_mut();
            let mut read = 0;
            while read < buf.len() {
                let Some(byte) = exchange.response.pop_front() else {
                    break;
                };
                buf[read] = byte;
                read += 1;
            }
            Ok(read)
        }
    }

    impl ReadReady for FakeConnection {
        fn read_ready(&mut self) -> core::result::Result<bool, Self::Error> {
            let exchange = self.0.borrow();
            Ok(exchange.closed || !exchange.response.is_empty())
        }
    }

    impl Write for FakeConnection {
        fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
            self.0.borrow_mut().written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> core::result::Result<(), Self::Error> {
            Ok(())
        }
    }

    /// A connector recording every opened connection.
    #[derive(Clone, Default)]
    pub(crate) struct FakeConnector {
        exchanges: Rc<RefCell<Vec<FakeConnection>>>,
        unreachable: Rc<RefCell<Option<String>>>,
    }

    impl FakeConnector {
        pub(crate) fn unreachable(&self, host: &str) {
            *self.unreachable.borrow_mut() = Some(host.into());
        }

        pub(crate) fn count(&self) -> usize {
            self.exchanges.borrow().len()
        }

        pub(crate) fn request(&self, index: usize) -> String {
            let exchanges = self.exchanges.borrow();
            let exchange = exchanges[index].0.borrow();
            String::from_utf8(exchange.written.clone()).unwrap()
        }

        pub(crate) fn endpoint(&self, index: usize) -> (String, u16) {
            let exchanges = self.exchanges.borrow();
            let exchange = exchanges[index].0.borrow();
            (exchange.host.clone(), exchange.port)
        }

        pub(crate) fn respond(&self, index: usize, bytes: &[u8]) {
            let exchanges = self.exchanges.borrow();
            exchanges[index].0.borrow_mut().response.extend(bytes);
        }

        pub(crate) fn close(&self, index: usize) {
            let exchanges = self.exchanges.borrow();
            exchanges[index].0.borrow_mut().closed = true;
        }
    }

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        fn connect(&mut self, host: &str, port: u16) -> Result<Self::Connection> {
            if self.unreachable.borrow().as_deref() == Some(host) {
                return Err(Error::new(ErrorKind::Connection, "Host unreachable"));
            }

            let connection = FakeConnection(Rc::new(RefCell::new(Exchange {
                host: host.into(),
                port,
                ..Exchange::default()
            })));
            self.exchanges.borrow_mut().push(connection.clone());
            Ok(connection)
        }
    }

    fn dispatcher() -> (Dispatcher<FakeConnector>, FakeConnector) {
        let connector = FakeConnector::default();
        (Dispatcher::new(connector.clone()), connector)
    }

    #[test]
    fn parse_url() {
        assert_eq!(
            Target::parse("http://example.com/notify").unwrap(),
            Target {
                authority: "example.com",
                host: "example.com",
                port: DEFAULT_HTTP_PORT,
                path: "/notify",
            }
        );

        let target = Target::parse("http://example.com").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.path, "/");

        let target = Target::parse("http://10.0.0.2:8080/hook?a=1").unwrap();
        assert_eq!(target.authority, "10.0.0.2:8080");
        assert_eq!(target.host, "10.0.0.2");
        assert_eq!(target.port, 8080);
        assert_eq!(target.path, "/hook?a=1");
    }

    #[test]
    fn parse_invalid_url() {
        assert_eq!(
            Target::parse("http:///path").map_err(|e| e.kind()),
            Err(ErrorKind::InvalidUrl)
        );
        assert_eq!(
            Target::parse("http://host:port/").map_err(|e| e.kind()),
            Err(ErrorKind::InvalidUrl)
        );
    }

    #[test]
    fn request_format() {
        let (mut dispatcher, connector) = dispatcher();

        dispatcher.request("http://example.com:8080/notify?GPIO2=CLOSED");

        assert!(dispatcher.is_busy());
        assert_eq!(connector.endpoint(0), ("example.com".into(), 8080));
        assert_eq!(
            connector.request(0),
            "GET /notify?GPIO2=CLOSED HTTP/1.1\r\n\
             Host: example.com:8080\r\n\
             Connection: close\r\n\r\n"
        );
    }

    #[test]
    fn busy_until_peer_closes() {
        let (mut dispatcher, connector) = dispatcher();
        dispatcher.request("http://example.com/a");

        dispatcher.poll();
        assert!(dispatcher.is_busy());

        connector.respond(0, b"HTTP/1.1 200 OK\r\n\r\nok");
        dispatcher.poll();
        assert!(dispatcher.is_busy());

        connector.close(0);
        dispatcher.poll();
        assert!(!dispatcher.is_busy());
        assert_eq!(dispatcher.stats().completed, 1);
    }

    #[test]
    fn request_while_busy_never_opens_a_second_connection() {
        let (mut dispatcher, connector) = dispatcher();

        dispatcher.request("http://example.com/a");
        dispatcher.request("http://example.com/b");
        dispatcher.poll();

        assert_eq!(connector.count(), 1);
        assert_eq!(dispatcher.in_flight(), Some("http://example.com/a"));
        assert_eq!(dispatcher.pending(), Some("http://example.com/b"));
    }

    #[test]
    fn latest_pending_request_wins() {
        let (mut dispatcher, connector) = dispatcher();

        dispatcher.request("http://example.com/first");
        dispatcher.request("http://example.com/second");
        dispatcher.request("http://example.com/third");

        connector.close(0);
        dispatcher.poll();

        assert_eq!(connector.count(), 2);
        assert!(connector.request(1).starts_with("GET /third "));
        assert_eq!(dispatcher.pending(), None);
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                sent: 2,
                failed: 0,
                coalesced: 1,
                completed: 1,
            }
        );

        connector.close(1);
        dispatcher.poll();
        assert!(!dispatcher.is_busy());
        assert_eq!(connector.count(), 2);
    }

    #[test]
    fn connection_failure_is_dropped() {
        let (mut dispatcher, connector) = dispatcher();
        connector.unreachable("down.example");

        dispatcher.request("http://down.example/notify");

        assert!(!dispatcher.is_busy());
        assert_eq!(connector.count(), 0);
        assert_eq!(dispatcher.stats().failed, 1);

        dispatcher.poll();
        assert_eq!(connector.count(), 0);
    }

    #[test]
    fn failed_pending_request_leaves_dispatcher_idle() {
        let (mut dispatcher, connector) = dispatcher();
        connector.unreachable("down.example");

        dispatcher.request("http://example.com/a");
        dispatcher.request("http://down.example/b");
        connector.close(0);
        dispatcher.poll();

        assert!(!dispatcher.is_busy());
        assert_eq!(dispatcher.pending(), None);
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[test]
    fn draining_is_bounded() {
        let (mut dispatcher, connector) = dispatcher();
        dispatcher.request("http://example.com/a");

        connector.respond(0, &[b'x'; 4096]);
        connector.close(0);

        dispatcher.poll();
        assert!(dispatcher.is_busy());

        for _ in 0..4 {
            dispatcher.poll();
        }
        assert!(!dispatcher.is_busy());
    }

    #[test]
    fn longest_url_is_dispatched() {
        let (mut dispatcher, connector) = dispatcher();
        let prefix = "http://example.com/";
        let path: String = core::iter::repeat_n('a', MAX_URL_LEN - prefix.len()).collect();
        let longest = alloc::format!("{prefix}{path}");

        dispatcher.request(&longest);
        assert_eq!(dispatcher.in_flight(), Some(longest.as_str()));

        dispatcher.request(&alloc::format!("{longest}a"));
        assert_eq!(dispatcher.pending(), None);
        assert_eq!(dispatcher.stats().failed, 1);
        assert_eq!(connector.count(), 1);
    }

    #[test]
    fn counters_wrap() {
        let (mut dispatcher, _connector) = dispatcher();
        dispatcher.stats.failed = u32::MAX;

        dispatcher.request("http:///missing-host");

        assert_eq!(dispatcher.stats().failed, 0);
    }
}
