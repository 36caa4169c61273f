//! Local DNS responder for intercepted hostnames.
//!
//! Answers `A` queries for hostnames held by the [`InterceptionDirectory`]
//! with their virtual address. Names the directory does not know are
//! forwarded to an upstream resolver when one is configured, and answered
//! with NXDOMAIN otherwise.

use crate::config::TunnelConfig;
use crate::error::{InterceptError, Result};
use crate::network::directory::InterceptionDirectory;
use metrics::counter;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, instrument, warn};

/// Record type A.
const QTYPE_A: u16 = 1;
/// Query type ANY.
const QTYPE_ANY: u16 = 255;
/// Class IN.
const QCLASS_IN: u16 = 1;

const RCODE_NOERROR: u8 = 0;
const RCODE_NXDOMAIN: u8 = 3;

/// Standard DNS packet size over UDP.
const MAX_UDP_PACKET: usize = 512;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with an incoming query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsAction {
    /// Send this packet back to the client.
    Reply(Vec<u8>),
    /// The name is not intercepted; ask the upstream resolver.
    Forward,
    /// Malformed query, nothing to send.
    Drop,
}

/// DNS responder backed by the interception directory.
pub struct DnsResponder {
    /// Address to bind to (e.g., 100.64.0.1:53)
    bind_addr: SocketAddr,
    directory: Arc<InterceptionDirectory>,
    /// Upstream resolvers for names that are not intercepted
    upstream: Vec<SocketAddr>,
    /// TTL of synthesized answers, in seconds
    ttl: u32,
}

impl DnsResponder {
    /// Create a new DNS responder.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - Address to listen on
    /// * `directory` - Directory answering intercepted names
    /// * `upstream` - Resolvers for everything else (may be empty)
    /// * `ttl` - TTL in seconds for synthesized `A` records
    #[instrument(skip(directory))]
    pub fn new(
        bind_addr: SocketAddr,
        directory: Arc<InterceptionDirectory>,
        upstream: Vec<SocketAddr>,
        ttl: u32,
    ) -> Self {
        info!(
            bind_addr = %bind_addr,
            upstream_count = upstream.len(),
            ttl,
            "Creating DNS responder"
        );

        Self { bind_addr, directory, upstream, ttl }
    }

    /// Create a responder from the tunnel configuration.
    pub fn from_config(config: &TunnelConfig, directory: Arc<InterceptionDirectory>) -> Self {
        let upstream =
            config.upstream_dns.iter().map(|ip| SocketAddr::new(*ip, 53)).collect::<Vec<_>>();
        Self::new(
            SocketAddr::new(IpAddr::V4(config.dns_ip), config.dns_port),
            directory,
            upstream,
            config.dns_ttl_secs,
        )
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Bind the configured address and serve queries until the task is aborted.
    pub async fn serve(self) -> Result<()> {
        let socket = UdpSocket::bind(self.bind_addr)
            .await
            .map_err(|e| InterceptError::io(format!("binding DNS socket {}", self.bind_addr), e))?;
        self.serve_on(socket).await
    }

    /// Serve queries on an already bound socket.
    pub async fn serve_on(self, socket: UdpSocket) -> Result<()> {
        let local_addr = socket
            .local_addr()
            .map_err(|e| InterceptError::io("reading DNS socket address", e))?;
        info!("DNS responder listening on {}", local_addr);

        let socket = Arc::new(socket);
        let responder = Arc::new(self);
        let mut buf = vec![0u8; MAX_UDP_PACKET];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, client_addr)) => {
                    let query = buf[..len].to_vec();
                    let responder = Arc::clone(&responder);
                    let socket = Arc::clone(&socket);

                    tokio::spawn(async move {
                        if let Err(e) = responder.handle_query(&query, client_addr, &socket).await {
                            error!("Failed to handle DNS query from {}: {}", client_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to receive DNS query: {}", e);
                }
            }
        }
    }

    async fn handle_query(
        &self,
        query: &[u8],
        client_addr: SocketAddr,
        socket: &UdpSocket,
    ) -> Result<()> {
        let response = match self.answer(query) {
            DnsAction::Reply(response) => response,
            DnsAction::Drop => return Ok(()),
            DnsAction::Forward => match self.upstream.first() {
                Some(upstream) => Self::forward_to_upstream(query, *upstream).await?,
                None => return Ok(()),
            },
        };

        socket
            .send_to(&response, client_addr)
            .await
            .map_err(|e| InterceptError::io(format!("sending DNS response to {}", client_addr), e))?;
        Ok(())
    }

    /// Decide how to answer a raw query packet.
    ///
    /// Only the first question is considered; stub resolvers send one.
    pub fn answer(&self, query_bytes: &[u8]) -> DnsAction {
        let query = match DnsQuery::parse(query_bytes) {
            Ok(q) => q,
            Err(e) => {
                warn!("Failed to parse DNS query: {}", e);
                counter!("intercept_dns_queries_total", "result" => "malformed").increment(1);
                return DnsAction::Drop;
            }
        };
        let question = &query.question;

        debug!(
            transaction_id = query.transaction_id,
            name = %question.display_name(),
            qtype = question.qtype,
            "Received DNS query"
        );

        let intercepted = question.hostname().and_then(|name| self.directory.resolve(&name));

        match intercepted {
            Some(addr) if question.wants_a_record() => {
                debug!(name = %question.display_name(), addr = %addr, "Resolved intercepted hostname");
                counter!("intercept_dns_queries_total", "result" => "answered").increment(1);
                DnsAction::Reply(self.build_response(&query, Some(addr), RCODE_NOERROR))
            }
            Some(_) => {
                // Intercepted name, but no record of the requested type.
                counter!("intercept_dns_queries_total", "result" => "nodata").increment(1);
                DnsAction::Reply(self.build_response(&query, None, RCODE_NOERROR))
            }
            None if !self.upstream.is_empty() => {
                counter!("intercept_dns_queries_total", "result" => "forwarded").increment(1);
                DnsAction::Forward
            }
            None => {
                counter!("intercept_dns_queries_total", "result" => "nxdomain").increment(1);
                DnsAction::Reply(self.build_response(&query, None, RCODE_NXDOMAIN))
            }
        }
    }

    /// Forward a DNS query to an upstream server.
    #[instrument(skip(query))]
    async fn forward_to_upstream(query: &[u8], upstream: SocketAddr) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| InterceptError::NetworkError(format!("Failed to bind UDP socket: {}", e)))?;

        socket
            .send_to(query, upstream)
            .await
            .map_err(|e| InterceptError::NetworkError(format!("Failed to send to upstream: {}", e)))?;

        let mut buf = vec![0u8; MAX_UDP_PACKET];
        let (len, _) = tokio::time::timeout(UPSTREAM_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .map_err(|_| InterceptError::NetworkError("Upstream DNS timeout".to_string()))?
            .map_err(|e| {
                InterceptError::NetworkError(format!("Failed to receive from upstream: {}", e))
            })?;

        Ok(buf[..len].to_vec())
    }

    /// Build a response echoing the question, with an optional `A` answer.
    fn build_response(&self, query: &DnsQuery, addr: Option<Ipv4Addr>, rcode: u8) -> Vec<u8> {
        let mut response = Vec::with_capacity(64);

        // Transaction ID
        response.extend_from_slice(&query.transaction_id.to_be_bytes());

        // Flags: QR=1, AA=1, RD copied from the query, RA=1
        response.push(0x84 | u8::from(query.recursion_desired));
        response.push(0x80 | rcode);

        // Counts: one question, zero or one answer, no authority/additional
        response.extend_from_slice(&1u16.to_be_bytes());
        response.extend_from_slice(&u16::from(addr.is_some()).to_be_bytes());
        response.extend_from_slice(&0u16.to_be_bytes());
        response.extend_from_slice(&0u16.to_be_bytes());

        query.question.write_to(&mut response);

        if let Some(addr) = addr {
            // Compression pointer to the question name at offset 12
            response.extend_from_slice(&[0xC0, 0x0C]);
            response.extend_from_slice(&QTYPE_A.to_be_bytes());
            response.extend_from_slice(&QCLASS_IN.to_be_bytes());
            response.extend_from_slice(&self.ttl.to_be_bytes());
            response.extend_from_slice(&4u16.to_be_bytes());
            response.extend_from_slice(&addr.octets());
        }

        response
    }
}

/// Longest encoded name, terminating zero included.
const MAX_NAME_LEN: usize = 255;
/// Compression pointers followed before a name is considered looped.
const MAX_POINTER_JUMPS: usize = 16;
const HEADER_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
enum ParseError {
    #[error("packet shorter than a DNS header")]
    TooShort,
    #[error("packet is a response, not a query")]
    NotAQuery,
    #[error("query carries no question")]
    NoQuestion,
    #[error("packet truncated at offset {0}")]
    Truncated(usize),
    #[error("reserved label type 0x{0:02x}")]
    ReservedLabel(u8),
    #[error("name exceeds {} bytes", MAX_NAME_LEN)]
    NameTooLong,
    #[error("more than {} compression pointers", MAX_POINTER_JUMPS)]
    PointerLoop,
}

/// Header fields of an incoming query and its first question.
#[derive(Debug)]
struct DnsQuery {
    transaction_id: u16,
    recursion_desired: bool,
    question: DnsQuestion,
}

#[derive(Debug)]
struct DnsQuestion {
    /// Labels exactly as received, each at most 63 bytes
    labels: Vec<Vec<u8>>,
    qtype: u16,
    qclass: u16,
}

impl DnsQuery {
    fn parse(data: &[u8]) -> std::result::Result<Self, ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::TooShort);
        }
        if data[2] & 0x80 != 0 {
            return Err(ParseError::NotAQuery);
        }
        if u16::from_be_bytes([data[4], data[5]]) == 0 {
            return Err(ParseError::NoQuestion);
        }

        let (labels, end) = read_name(data, HEADER_LEN)?;
        let fixed = data.get(end..end + 4).ok_or(ParseError::Truncated(end))?;

        Ok(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            recursion_desired: data[2] & 0x01 != 0,
            question: DnsQuestion {
                labels,
                qtype: u16::from_be_bytes([fixed[0], fixed[1]]),
                qclass: u16::from_be_bytes([fixed[2], fixed[3]]),
            },
        })
    }
}

impl DnsQuestion {
    /// Dotted name for directory lookups.
    ///
    /// `None` when a label is not valid UTF-8 or embeds a dot, since such a
    /// name can never match a registered hostname.
    fn hostname(&self) -> Option<String> {
        let mut parts = Vec::with_capacity(self.labels.len());
        for label in &self.labels {
            let label = std::str::from_utf8(label).ok()?;
            if label.contains('.') {
                return None;
            }
            parts.push(label);
        }
        Some(parts.join("."))
    }

    /// Lossy rendering for logs.
    fn display_name(&self) -> String {
        self.labels.iter().map(|l| String::from_utf8_lossy(l)).collect::<Vec<_>>().join(".")
    }

    fn wants_a_record(&self) -> bool {
        self.qclass == QCLASS_IN && (self.qtype == QTYPE_A || self.qtype == QTYPE_ANY)
    }

    /// Write the question back in wire format, uncompressed.
    fn write_to(&self, buf: &mut Vec<u8>) {
        for label in &self.labels {
            // Parsing caps labels at 63 bytes.
            buf.push(label.len() as u8);
            buf.extend_from_slice(label);
        }
        buf.push(0);
        buf.extend_from_slice(&self.qtype.to_be_bytes());
        buf.extend_from_slice(&self.qclass.to_be_bytes());
    }
}

/// Read a possibly compressed name starting at `start`.
///
/// Returns the labels and the offset just past the name as it appears at
/// `start` (after the first pointer, if any).
fn read_name(
    data: &[u8],
    start: usize,
) -> std::result::Result<(Vec<Vec<u8>>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut resume = None;
    let mut jumps = 0;
    let mut encoded_len = 1;

    loop {
        let len = *data.get(pos).ok_or(ParseError::Truncated(pos))?;
        match len & 0xC0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let label_start = pos + 1;
                let label_end = label_start + usize::from(len);
                let label =
                    data.get(label_start..label_end).ok_or(ParseError::Truncated(label_start))?;
                encoded_len += label.len() + 1;
                if encoded_len > MAX_NAME_LEN {
                    return Err(ParseError::NameTooLong);
                }
                labels.push(label.to_vec());
                pos = label_end;
            }
            0xC0 => {
                let low = *data.get(pos + 1).ok_or(ParseError::Truncated(pos + 1))?;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(ParseError::PointerLoop);
                }
                resume.get_or_insert(pos + 2);
                pos = (usize::from(len & 0x3F) << 8) | usize::from(low);
            }
            _ => return Err(ParseError::ReservedLabel(len)),
        }
    }

    Ok((labels, resume.unwrap_or(pos)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionHandle;

    fn query_with_labels(labels: &[&[u8]], qtype: u16) -> Vec<u8> {
        let mut packet = vec![
            0x12, 0x34, // Transaction ID
            0x01, 0x00, // Flags: standard query, RD
            0x00, 0x01, // Questions: 1
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        for label in labels {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label);
        }
        packet.push(0);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&QCLASS_IN.to_be_bytes());
        packet
    }

    fn query(name: &str, qtype: u16) -> Vec<u8> {
        let labels: Vec<&[u8]> = name.split('.').map(str::as_bytes).collect();
        query_with_labels(&labels, qtype)
    }

    fn responder(upstream: Vec<SocketAddr>) -> DnsResponder {
        let directory =
            Arc::new(InterceptionDirectory::new(Ipv4Addr::new(100, 64, 0, 0), 24).unwrap());
        let session = SessionHandle::generate("n1");
        directory.register_service("svc1", "api.internal", 443, &session, "api").unwrap();
        DnsResponder::new("127.0.0.1:0".parse().unwrap(), directory, upstream, 60)
    }

    fn reply(action: DnsAction) -> Vec<u8> {
        match action {
            DnsAction::Reply(response) => response,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    fn rcode(response: &[u8]) -> u8 {
        response[3] & 0x0F
    }

    fn answer_count(response: &[u8]) -> u16 {
        u16::from_be_bytes([response[6], response[7]])
    }

    #[test]
    fn test_dns_query_parse() {
        let parsed = DnsQuery::parse(&query("test.internal", QTYPE_A)).unwrap();
        assert_eq!(parsed.transaction_id, 0x1234);
        assert!(parsed.recursion_desired);
        assert_eq!(parsed.question.hostname().as_deref(), Some("test.internal"));
        assert_eq!(parsed.question.qtype, QTYPE_A);
    }

    #[test]
    fn test_parse_rejects_pointer_loop() {
        let mut packet = query("x", QTYPE_A);
        // Replace the name with a pointer to itself.
        packet.truncate(HEADER_LEN);
        packet.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
        assert_eq!(DnsQuery::parse(&packet).unwrap_err(), ParseError::PointerLoop);
    }

    #[test]
    fn test_parse_rejects_reserved_label_lengths() {
        for len in [0x40u8, 0x7F, 0x80, 0xBF] {
            let mut packet = query("x", QTYPE_A);
            packet[HEADER_LEN] = len;
            assert_eq!(
                DnsQuery::parse(&packet).unwrap_err(),
                ParseError::ReservedLabel(len),
                "length byte 0x{:02x}",
                len
            );
        }
    }

    #[test]
    fn test_parse_rejects_overlong_names() {
        let label = [b'a'; 63];
        let packet = query_with_labels(&[&label, &label, &label, &label], QTYPE_A);
        assert_eq!(DnsQuery::parse(&packet).unwrap_err(), ParseError::NameTooLong);
    }

    #[test]
    fn test_parse_rejects_truncated_question() {
        let packet = query("api.internal", QTYPE_A);
        let err = DnsQuery::parse(&packet[..packet.len() - 2]).unwrap_err();
        assert!(matches!(err, ParseError::Truncated(_)));
    }

    #[test]
    fn test_answers_intercepted_name() {
        let response = reply(responder(vec![]).answer(&query("API.internal", QTYPE_A)));

        assert_eq!(&response[..2], &[0x12, 0x34]);
        assert_eq!(response[2] & 0x80, 0x80, "QR bit set");
        assert_eq!(rcode(&response), RCODE_NOERROR);
        assert_eq!(answer_count(&response), 1);
        assert_eq!(&response[response.len() - 4..], &[100, 64, 0, 2]);
        let ttl = &response[response.len() - 10..response.len() - 6];
        assert_eq!(ttl, &60u32.to_be_bytes());
    }

    #[test]
    fn test_question_is_echoed_byte_for_byte() {
        // Invalid UTF-8 triples in size when decoded lossily.
        let binary = [0xFFu8; 63];
        let packet = query_with_labels(&[&binary, b"internal"], QTYPE_A);

        let response = reply(responder(vec![]).answer(&packet));

        assert_eq!(rcode(&response), RCODE_NXDOMAIN);
        assert_eq!(&response[HEADER_LEN..], &packet[HEADER_LEN..]);
    }

    #[test]
    fn test_label_with_embedded_dot_is_not_intercepted() {
        let packet = query_with_labels(&[b"api.internal"], QTYPE_A);

        let response = reply(responder(vec![]).answer(&packet));

        assert_eq!(rcode(&response), RCODE_NXDOMAIN);
        assert_eq!(answer_count(&response), 0);
        assert_eq!(&response[HEADER_LEN..], &packet[HEADER_LEN..]);
    }

    #[test]
    fn test_nodata_for_other_record_types() {
        let response = reply(responder(vec![]).answer(&query("api.internal", 28)));
        assert_eq!(rcode(&response), RCODE_NOERROR);
        assert_eq!(answer_count(&response), 0);
    }

    #[test]
    fn test_nxdomain_without_upstream() {
        let response = reply(responder(vec![]).answer(&query("example.com", QTYPE_A)));
        assert_eq!(rcode(&response), RCODE_NXDOMAIN);
        assert_eq!(answer_count(&response), 0);
    }

    #[test]
    fn test_forwards_unknown_names_with_upstream() {
        let responder = responder(vec!["1.1.1.1:53".parse().unwrap()]);
        assert_eq!(responder.answer(&query("example.com", QTYPE_A)), DnsAction::Forward);
    }

    #[test]
    fn test_drops_malformed_packets() {
        let responder = responder(vec![]);
        assert_eq!(responder.answer(&[0x00, 0x01, 0x02]), DnsAction::Drop);

        let mut response_packet = query("api.internal", QTYPE_A);
        response_packet[2] |= 0x80;
        assert_eq!(responder.answer(&response_packet), DnsAction::Drop);

        let mut no_question = query("api.internal", QTYPE_A);
        no_question[5] = 0;
        assert_eq!(responder.answer(&no_question), DnsAction::Drop);
    }
}
