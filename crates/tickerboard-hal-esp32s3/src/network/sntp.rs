//! Bounded SNTP exchange implementing the core time-sync seam.
//!
//! One 48-byte mode-3 request per attempt, each independent; attempts are
//! spaced by the configured interval and the whole call is bounded by
//! `max_attempts`.

use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::Stack;
use embassy_time::{Duration, Timer, WithTimeout};
use log::{debug, warn};
use tickerboard_core::cycle::{SyncOutcome, TimeSync};

const NTP_PORT: u16 = 123;
const LOCAL_PORT: u16 = 50_123;
const PACKET_BYTES: usize = 48;
/// Seconds between the NTP era (1900) and the Unix epoch.
const ERA_OFFSET_SECS: u64 = 2_208_988_800;
const REPLY_TIMEOUT_MS: u64 = 1_500;
/// LI=0, VN=4, mode 3 (client).
const REQUEST_HEADER: u8 = 0x23;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SntpError {
    Dns,
    Bind,
    Send,
    Recv,
    Timeout,
    ShortReply,
    BadMode,
    KissOfDeath,
    ZeroStamp,
}

pub struct SntpClient<'d> {
    stack: Stack<'d>,
    server: &'static str,
}

impl<'d> SntpClient<'d> {
    pub fn new(stack: Stack<'d>, server: &'static str) -> Self {
        Self { stack, server }
    }

    async fn query_once(&mut self) -> Result<u64, SntpError> {
        let addrs = self
            .stack
            .dns_query(self.server, DnsQueryType::A)
            .await
            .map_err(|_| SntpError::Dns)?;
        let addr = *addrs.first().ok_or(SntpError::Dns)?;

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buf = [0u8; 128];
        let mut tx_buf = [0u8; 128];
        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buf,
            &mut tx_meta,
            &mut tx_buf,
        );
        socket.bind(LOCAL_PORT).map_err(|_| SntpError::Bind)?;

        let mut packet = [0u8; PACKET_BYTES];
        packet[0] = REQUEST_HEADER;
        socket
            .send_to(&packet, (addr, NTP_PORT))
            .await
            .map_err(|_| SntpError::Send)?;

        let mut reply = [0u8; PACKET_BYTES];
        let (len, _meta) = socket
            .recv_from(&mut reply)
            .with_timeout(Duration::from_millis(REPLY_TIMEOUT_MS))
            .await
            .map_err(|_| SntpError::Timeout)?
            .map_err(|_| SntpError::Recv)?;

        if len < PACKET_BYTES {
            return Err(SntpError::ShortReply);
        }
        if reply[0] & 0x07 != 4 {
            return Err(SntpError::BadMode);
        }
        if reply[1] == 0 {
            // Stratum 0 is a kiss-of-death reply.
            return Err(SntpError::KissOfDeath);
        }

        let secs =
            u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]) as u64;
        if secs == 0 {
            return Err(SntpError::ZeroStamp);
        }
        // Era 1 wraps in 2036; stamps below the offset belong to it.
        let unix = if secs >= ERA_OFFSET_SECS {
            secs - ERA_OFFSET_SECS
        } else {
            secs + (1u64 << 32) - ERA_OFFSET_SECS
        };
        Ok(unix)
    }
}

impl TimeSync for SntpClient<'_> {
    async fn sync(&mut self, max_attempts: u8, retry_interval_ms: u32) -> SyncOutcome {
        for attempt in 1..=max_attempts {
            match self.query_once().await {
                Ok(epoch) => {
                    debug!("sntp attempt {}: epoch {}", attempt, epoch);
                    return SyncOutcome::Synced(epoch);
                }
                Err(err) => {
                    warn!("sntp attempt {}/{} failed: {:?}", attempt, max_attempts, err);
                }
            }
            if attempt < max_attempts {
                Timer::after_millis(retry_interval_ms as u64).await;
            }
        }
        SyncOutcome::Unsynced
    }
}
