//! ICE candidate gathering over plain STUN (RFC 5389 Binding).
//!
//! A host candidate is the local address of a UDP socket bound for each
//! family; a server-reflexive candidate is the XOR-MAPPED-ADDRESS the STUN
//! server reports back. Both are emitted as SDP `candidate:` lines.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, trace};

use crate::dual_stack::StackFamily;
use crate::error::StunError;
use crate::scheduler::CancelToken;

pub const MAGIC_COOKIE: u32 = 0x2112_A442;
const HEADER_LEN: usize = 20;
const RETRANSMIT_SCHEDULE_MS: [u64; 3] = [500, 1_000, 1_500];

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    BindingRequest = 0x0001,
    BindingSuccess = 0x0101,
    BindingError = 0x0111,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    MappedAddress = 0x0001,
    XorMappedAddress = 0x0020,
}

pub type TransactionId = [u8; 12];

pub fn encode_binding_request(transaction_id: &TransactionId) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[0..2].copy_from_slice(&(MessageType::BindingRequest as u16).to_be_bytes());
    // zero-length body
    out[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    out[8..20].copy_from_slice(transaction_id);
    out
}

/// Returns the reflexive transport address from a Binding success response.
pub fn decode_binding_response(buf: &[u8], expected: &TransactionId) -> Result<SocketAddr, StunError> {
    if buf.len() < HEADER_LEN {
        return Err(StunError::Malformed("shorter than header"));
    }
    let message_type = u16::from_be_bytes([buf[0], buf[1]]);
    if message_type == MessageType::BindingError as u16 {
        return Err(StunError::Malformed("binding error response"));
    }
    if message_type != MessageType::BindingSuccess as u16 {
        return Err(StunError::Malformed("not a binding success response"));
    }
    let body_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) != MAGIC_COOKIE {
        return Err(StunError::Malformed("bad magic cookie"));
    }
    if &buf[8..20] != expected {
        return Err(StunError::TransactionMismatch);
    }
    let body = buf
        .get(HEADER_LEN..HEADER_LEN + body_len)
        .ok_or(StunError::Malformed("body length exceeds datagram"))?;

    let mut mapped = None;
    let mut offset = 0;
    while offset + 4 <= body.len() {
        let attr_type = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let attr_len = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
        let value = body
            .get(offset + 4..offset + 4 + attr_len)
            .ok_or(StunError::Malformed("attribute overruns body"))?;

        if attr_type == AttributeType::XorMappedAddress as u16 {
            return decode_address(value, Some(expected));
        }
        if attr_type == AttributeType::MappedAddress as u16 && mapped.is_none() {
            mapped = Some(decode_address(value, None)?);
        }
        // attributes are padded to 4 bytes
        offset += 4 + attr_len.div_ceil(4) * 4;
    }
    mapped.ok_or(StunError::Malformed("no mapped address attribute"))
}

fn decode_address(value: &[u8], xor_with: Option<&TransactionId>) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::Malformed("address attribute too short"));
    }
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xor_with.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }
    let ip = match value[1] {
        0x01 => {
            let raw: [u8; 4] = value
                .get(4..8)
                .and_then(|s| s.try_into().ok())
                .ok_or(StunError::Malformed("truncated IPv4 address"))?;
            let mut octets = raw;
            if xor_with.is_some() {
                for (o, k) in octets.iter_mut().zip(cookie.iter()) {
                    *o ^= k;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x02 => {
            let raw: [u8; 16] = value
                .get(4..20)
                .and_then(|s| s.try_into().ok())
                .ok_or(StunError::Malformed("truncated IPv6 address"))?;
            let mut octets = raw;
            if let Some(tid) = xor_with {
                let key = cookie.iter().chain(tid.iter());
                for (o, k) in octets.iter_mut().zip(key) {
                    *o ^= k;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(StunError::Malformed("unknown address family")),
    };
    Ok(SocketAddr::new(ip, port))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
}

impl CandidateKind {
    fn type_preference(self) -> u32 {
        match self {
            CandidateKind::Host => 126,
            CandidateKind::ServerReflexive => 100,
        }
    }

    fn sdp_name(self) -> &'static str {
        match self {
            CandidateKind::Host => "host",
            CandidateKind::ServerReflexive => "srflx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub kind: CandidateKind,
    pub address: SocketAddr,
    pub related: Option<SocketAddr>,
}

impl IceCandidate {
    const COMPONENT: u32 = 1;
    const LOCAL_PREFERENCE: u32 = 65_535;

    pub fn priority(&self) -> u32 {
        (self.kind.type_preference() << 24) + (Self::LOCAL_PREFERENCE << 8) + (256 - Self::COMPONENT)
    }

    fn foundation(&self) -> u32 {
        let family = if self.address.is_ipv4() { 1 } else { 2 };
        self.kind.type_preference() * 10 + family
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} udp {} {} {} typ {}",
            self.foundation(),
            Self::COMPONENT,
            self.priority(),
            self.address.ip(),
            self.address.port(),
            self.kind.sdp_name()
        )?;
        if let Some(related) = self.related {
            write!(f, " raddr {} rport {}", related.ip(), related.port())?;
        }
        Ok(())
    }
}

/// Produces ICE candidate lines until done, cancelled, or the receiver is dropped.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn gather(&self, sink: mpsc::Sender<String>, cancel: CancelToken);
}

pub struct StunCandidateSource {
    server: String,
}

impl StunCandidateSource {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }

    async fn gather_family(
        &self,
        server: Option<SocketAddr>,
        family: StackFamily,
        sink: &mpsc::Sender<String>,
        cancel: &CancelToken,
    ) {
        let result = match server {
            Some(server) => self.query(server, family, sink, cancel).await,
            None => Err(StunError::Unresolvable(self.server.clone())),
        };
        if let Err(err) = result {
            debug!(family = family.label(), error = %err, "candidate gathering stopped");
        }
    }

    async fn query(
        &self,
        server: SocketAddr,
        family: StackFamily,
        sink: &mpsc::Sender<String>,
        cancel: &CancelToken,
    ) -> Result<(), StunError> {
        let socket = bind_udp(family)?;
        socket.connect(server).await?;
        let local = socket.local_addr()?;
        if !local.ip().is_unspecified() {
            let host = IceCandidate {
                kind: CandidateKind::Host,
                address: local,
                related: None,
            };
            if sink.send(host.to_string()).await.is_err() {
                return Ok(());
            }
        }

        let transaction_id: TransactionId = rand::random();
        let request = encode_binding_request(&transaction_id);
        let mut buf = [0u8; 576];

        for rto in RETRANSMIT_SCHEDULE_MS {
            if cancel.is_cancelled() {
                return Ok(());
            }
            socket.send(&request).await?;
            let received = tokio::select! {
                r = time::timeout(Duration::from_millis(rto), socket.recv(&mut buf)) => r,
                _ = cancel.cancelled() => return Ok(()),
            };
            let len = match received {
                Ok(len) => len?,
                Err(_) => {
                    trace!(family = family.label(), rto, "STUN retransmit");
                    continue;
                }
            };
            let reflexive = match decode_binding_response(&buf[..len], &transaction_id) {
                Ok(addr) => addr,
                Err(StunError::TransactionMismatch) => continue,
                Err(err) => return Err(err),
            };
            let srflx = IceCandidate {
                kind: CandidateKind::ServerReflexive,
                address: reflexive,
                related: Some(local),
            };
            let _ = sink.send(srflx.to_string()).await;
            return Ok(());
        }
        Err(StunError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "no STUN binding response",
        )))
    }
}

#[async_trait]
impl CandidateSource for StunCandidateSource {
    async fn gather(&self, sink: mpsc::Sender<String>, cancel: CancelToken) {
        let addrs: Vec<SocketAddr> = tokio::select! {
            r = lookup_host(self.server.as_str()) => match r {
                Ok(it) => it.collect(),
                Err(err) => {
                    debug!(server = %self.server, error = %err, "STUN server lookup failed");
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        };
        let v4 = addrs.iter().copied().find(SocketAddr::is_ipv4);
        let v6 = addrs.iter().copied().find(SocketAddr::is_ipv6);
        tokio::join!(
            self.gather_family(v4, StackFamily::V4, &sink, &cancel),
            self.gather_family(v6, StackFamily::V6, &sink, &cancel),
        );
    }
}

/// Single-family UDP socket; the v6 socket refuses v4-mapped traffic.
fn bind_udp(family: StackFamily) -> Result<UdpSocket, StunError> {
    let (domain, bind): (Domain, SocketAddr) = match family {
        StackFamily::V4 => (Domain::IPV4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
        StackFamily::V6 => (Domain::IPV6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))),
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if family == StackFamily::V6 {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&bind.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}
