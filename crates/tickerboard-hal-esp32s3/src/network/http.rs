//! Minimal HTTP GET client over the embedded TCP stack, used as the
//! quote transport.
//!
//! Requests go out as HTTP/1.0 with `Connection: close` so the origin
//! neither chunks nor pipelines; the response is read to EOF and split at
//! the header boundary in place. TLS termination belongs to the transport
//! layer in front of the quote origin, not here.

use core::fmt::Write as _;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_time::{Duration, WithTimeout};
use heapless::String;
use log::debug;
use tickerboard_core::fetch::{QuoteTransport, TransportError};

const HTTP_DEFAULT_PORT: u16 = 80;
const REQUEST_MAX_BYTES: usize = 320;
const SOCKET_RX_BYTES: usize = 4096;
const SOCKET_TX_BYTES: usize = 512;
const HEADER_END: &[u8] = b"\r\n\r\n";

pub struct HttpTransport<'d> {
    stack: Stack<'d>,
    timeout_ms: u32,
}

impl<'d> HttpTransport<'d> {
    pub fn new(stack: Stack<'d>, timeout_ms: u32) -> Self {
        Self { stack, timeout_ms }
    }

    async fn get_inner(&mut self, url: &str, body: &mut [u8]) -> Result<usize, TransportError> {
        let (host, port, path) = split_url(url).ok_or(TransportError::BadUrl)?;

        let addrs = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|_| TransportError::Dns)?;
        let addr = *addrs.first().ok_or(TransportError::Dns)?;

        let mut rx = [0u8; SOCKET_RX_BYTES];
        let mut tx = [0u8; SOCKET_TX_BYTES];
        let mut socket = TcpSocket::new(self.stack, &mut rx, &mut tx);
        socket.set_timeout(Some(Duration::from_millis(self.timeout_ms as u64)));

        socket
            .connect((addr, port))
            .await
            .map_err(|_| TransportError::Connect)?;

        let mut request: String<REQUEST_MAX_BYTES> = String::new();
        write!(
            request,
            "GET {path} HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\nUser-Agent: tickerboard\r\n\r\n"
        )
        .map_err(|_| TransportError::BadUrl)?;
        write_all(&mut socket, request.as_bytes()).await?;

        let mut used = 0usize;
        loop {
            if used == body.len() {
                // Payload over budget counts as unusable, not fatal.
                return Err(TransportError::Io);
            }
            match socket.read(&mut body[used..]).await {
                Ok(0) => break,
                Ok(n) => used += n,
                Err(_) => return Err(TransportError::Io),
            }
        }
        socket.close();

        let header_end =
            find(&body[..used], HEADER_END).ok_or(TransportError::Io)? + HEADER_END.len();
        let status = parse_status(&body[..header_end]).ok_or(TransportError::Io)?;
        debug!("http get {}: status {} body {}B", host, status, used - header_end);
        if !(200..300).contains(&status) {
            return Err(TransportError::Status(status));
        }

        body.copy_within(header_end..used, 0);
        Ok(used - header_end)
    }
}

impl QuoteTransport for HttpTransport<'_> {
    async fn get(&mut self, url: &str, body: &mut [u8]) -> Result<usize, TransportError> {
        let budget = Duration::from_millis(self.timeout_ms as u64);
        match self.get_inner(url, body).with_timeout(budget).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

/// Split `http://host[:port]/path?query` into its parts. The scheme is
/// tolerated but ignored; the port defaults to 80.
fn split_url(url: &str) -> Option<(&str, u16, &str)> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    if rest.is_empty() {
        return None;
    }

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.find(':') {
        Some(idx) => {
            let port: u16 = authority[idx + 1..].parse().ok()?;
            (&authority[..idx], port)
        }
        None => (authority, HTTP_DEFAULT_PORT),
    };

    if host.is_empty() { None } else { Some((host, port, path)) }
}

fn parse_status(header: &[u8]) -> Option<u16> {
    // "HTTP/1.x NNN ..."
    let space = header.iter().position(|b| *b == b' ')?;
    let digits = header.get(space + 1..space + 4)?;
    let mut status = 0u16;
    for b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        status = status * 10 + (b - b'0') as u16;
    }
    Some(status)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&idx| &haystack[idx..idx + needle.len()] == needle)
}

async fn write_all(socket: &mut TcpSocket<'_>, mut data: &[u8]) -> Result<(), TransportError> {
    while !data.is_empty() {
        let written = socket.write(data).await.map_err(|_| TransportError::Io)?;
        if written == 0 {
            return Err(TransportError::Io);
        }
        data = &data[written..];
    }
    socket.flush().await.map_err(|_| TransportError::Io)
}
