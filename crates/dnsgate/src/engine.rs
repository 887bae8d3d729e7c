use std::sync::Arc;

use dnsgate_lib::{classify, synthesize, DnsDatagram, DnsQuery, Synthesis};

use crate::allowlist::AllowListStore;
use crate::stats::Stats;
use crate::upstream::UpstreamForwarder;

/// What the read loop has to do with a frame.
#[derive(Debug)]
pub enum FrameAction {
    /// Not DNS traffic, dropped without counting
    Ignore,
    /// DNS traffic that couldn't be parsed, dropped
    Malformed,
    /// Response ready to be written back, e.g. NXDOMAIN for a blocked domain
    Respond(Vec<u8>),
    /// Allowed query waiting to be relayed upstream
    Forward(ForwardJob),
}

/// An allowed query handed off to the upstream forwarder.
#[derive(Debug, Clone)]
pub struct ForwardJob {
    frame: Vec<u8>,
    datagram: DnsDatagram,
    pub id: u16,
    pub domain: String,
    /// Allow-list version the decision was made with
    pub list_version: u64,
}

impl ForwardJob {
    /// The DNS message to send upstream, unchanged
    pub fn query(&self) -> &[u8] {
        self.datagram.payload(&self.frame)
    }
}

/// Filtering pipeline: classify, parse, decide, then either answer at once
/// or hand the query to the forwarder.
pub struct FilterEngine<S> {
    store: Arc<S>,
    forwarder: UpstreamForwarder,
    stats: Stats,
}

impl<S: AllowListStore> FilterEngine<S> {
    pub fn new(store: Arc<S>, forwarder: UpstreamForwarder) -> Self {
        FilterEngine {
            store,
            forwarder,
            stats: Stats::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Runs the synchronous part of the pipeline on one inbound frame.
    pub fn process_frame(&self, frame: &[u8]) -> FrameAction {
        let datagram = match classify(frame) {
            Ok(datagram) => datagram,
            Err(e) if e.is_malformed() => {
                self.stats.record_query();
                self.stats.record_malformed();
                tracing::debug!("Dropping a malformed frame: {}", e);
                return FrameAction::Malformed;
            }
            Err(e) => {
                tracing::trace!("Ignoring a frame: {}", e);
                return FrameAction::Ignore;
            }
        };

        self.stats.record_query();
        let query = match DnsQuery::parse(datagram.payload(frame)) {
            Ok(query) => query,
            Err(e) => {
                self.stats.record_malformed();
                tracing::debug!("Dropping a malformed DNS query: {}", e);
                return FrameAction::Malformed;
            }
        };

        // One snapshot per decision, a concurrent reload can't change it midway
        let list = self.store.current();
        let id = query.id();
        if list.allows(&query.qname) {
            tracing::debug!(domain = %query.qname, id, version = list.version(), "Forwarding an allowed query");
            self.stats.record_forwarded();
            return FrameAction::Forward(ForwardJob {
                frame: frame.to_vec(),
                datagram,
                id,
                domain: query.qname,
                list_version: list.version(),
            });
        }

        tracing::debug!(domain = %query.qname, id, version = list.version(), "Blocking a query");
        self.stats.record_blocked();
        match synthesize(frame, &datagram, Synthesis::Block) {
            Ok(response) => FrameAction::Respond(response),
            Err(e) => {
                tracing::error!(domain = %query.qname, id, "Error while building an NXDOMAIN response: {}", e);
                FrameAction::Ignore
            }
        }
    }

    /// Relays `job` upstream and builds the response frame.
    ///
    /// Returns `None` when no resolver answered, in which case nothing must
    /// be written back.
    pub async fn forward(&self, job: ForwardJob) -> Option<Vec<u8>> {
        let upstream_response = match self.forwarder.forward(job.query()).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_upstream_failure();
                tracing::debug!(domain = %job.domain, id = job.id, "Dropping a query: {}", e);
                return None;
            }
        };

        match synthesize(&job.frame, &job.datagram, Synthesis::Relay(&upstream_response)) {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::error!(domain = %job.domain, id = job.id, "Error while building a relayed response: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use dnsgate_lib::test_utils::{build_ipv4_udp_frame, build_query_frame, FrameSpec};
    use dnsgate_lib::{checksum, ResponseCode};
    use tokio::net::UdpSocket;

    use super::*;
    use crate::allowlist::InMemoryAllowListStore;

    fn engine(entries: &[&str], resolvers: Vec<SocketAddr>) -> FilterEngine<InMemoryAllowListStore> {
        FilterEngine::new(
            Arc::new(InMemoryAllowListStore::new(entries)),
            UpstreamForwarder::new(resolvers, Duration::from_millis(500)),
        )
    }

    /// Decisions only, nothing is forwarded
    fn unreachable_resolver() -> Vec<SocketAddr> {
        Vec::new()
    }

    #[test]
    fn blocks_unlisted_domain() {
        let engine = engine(&[], unreachable_resolver());
        let frame = build_query_frame(&FrameSpec::default(), 0x1234, "example.com");

        let FrameAction::Respond(response) = engine.process_frame(&frame) else {
            panic!("expected an NXDOMAIN response");
        };
        let message = DnsQuery::parse(&response[28..]).expect("shouldn't have failed");
        assert_eq!(message.id(), 0x1234);
        assert!(message.header.is_response);
        assert_eq!(message.header.response_code, ResponseCode::NameError);
        assert_eq!(message.qname, "example.com");
        assert_eq!(checksum(&response[..20]), 0);

        let stats = engine.stats().snapshot();
        assert_eq!((stats.queries_total, stats.queries_blocked), (1, 1));
    }

    #[test]
    fn forwards_listed_domain() {
        let engine = engine(&["quran.com"], unreachable_resolver());
        let frame = build_query_frame(&FrameSpec::default(), 7, "WWW.Quran.com");

        let FrameAction::Forward(job) = engine.process_frame(&frame) else {
            panic!("expected a forward");
        };
        assert_eq!(job.id, 7);
        assert_eq!(job.domain, "WWW.Quran.com");
        assert_eq!(job.list_version, 1);
        assert_eq!(job.query(), &frame[28..]);
        assert_eq!(engine.stats().snapshot().queries_forwarded, 1);
    }

    #[test]
    fn ignores_non_dns_traffic() {
        let engine = engine(&[], unreachable_resolver());
        let spec = FrameSpec {
            destination_port: 443,
            ..Default::default()
        };
        let frame = build_ipv4_udp_frame(&spec, b"hello");

        assert!(matches!(engine.process_frame(&frame), FrameAction::Ignore));
        assert!(matches!(engine.process_frame(&[0x60; 40]), FrameAction::Ignore));
        assert!(matches!(engine.process_frame(&[]), FrameAction::Ignore));
        assert_eq!(engine.stats().snapshot(), Default::default());
    }

    #[test]
    fn counts_malformed_queries() {
        let engine = engine(&["quran.com"], unreachable_resolver());

        // Label length runs past the end of the message
        let mut message = dnsgate_lib::test_utils::build_dns_query(1, "quran.com");
        message.truncate(15);
        let frame = build_ipv4_udp_frame(&FrameSpec::default(), &message);
        assert!(matches!(engine.process_frame(&frame), FrameAction::Malformed));

        // Shorter than a DNS header
        let frame = build_ipv4_udp_frame(&FrameSpec::default(), &[0; 6]);
        assert!(matches!(engine.process_frame(&frame), FrameAction::Malformed));

        // UDP header cut off
        let frame = build_query_frame(&FrameSpec::default(), 1, "quran.com");
        assert!(matches!(engine.process_frame(&frame[..24]), FrameAction::Malformed));

        let stats = engine.stats().snapshot();
        assert_eq!((stats.queries_total, stats.queries_malformed), (3, 3));
        assert_eq!(stats.queries_forwarded, 0);
    }

    #[test]
    fn decision_keeps_the_version_it_was_made_with() {
        let store = Arc::new(InMemoryAllowListStore::new(["a.com"]));
        let engine = FilterEngine::new(
            store.clone(),
            UpstreamForwarder::new(unreachable_resolver(), Duration::from_millis(500)),
        );
        let a_frame = build_query_frame(&FrameSpec::default(), 1, "a.com");
        let b_frame = build_query_frame(&FrameSpec::default(), 2, "b.com");

        let FrameAction::Forward(in_flight) = engine.process_frame(&a_frame) else {
            panic!("expected a forward");
        };
        let blocked = engine.process_frame(&b_frame);
        assert!(matches!(blocked, FrameAction::Respond(_)));

        assert_eq!(store.replace(["a.com", "b.com"]), 2);

        // Decisions made under v1 are untouched
        assert_eq!(in_flight.list_version, 1);
        assert!(matches!(blocked, FrameAction::Respond(_)));

        let FrameAction::Forward(job) = engine.process_frame(&b_frame) else {
            panic!("expected a forward under v2");
        };
        assert_eq!(job.list_version, 2);
    }

    #[tokio::test]
    async fn relays_upstream_response() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.expect("shouldn't have failed");
        let upstream_addr = upstream.local_addr().expect("shouldn't have failed");
        let engine = engine(&["quran.com"], vec![upstream_addr]);

        let frame = build_query_frame(&FrameSpec::default(), 0xabcd, "www.quran.com");
        let FrameAction::Forward(job) = engine.process_frame(&frame) else {
            panic!("expected a forward");
        };

        let answer = tokio::spawn(async move {
            let mut buf = [0; 512];
            let (len, from) = upstream.recv_from(&mut buf).await.expect("shouldn't have failed");
            let mut response = buf[..len].to_vec();
            response[2] |= 0x80;
            response.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 1, 2, 3, 4]);
            upstream.send_to(&response, from).await.expect("shouldn't have failed");
            response
        });

        let response = engine.forward(job).await.expect("should have been answered");
        let upstream_response = answer.await.expect("shouldn't have failed");
        assert_eq!(&response[28..], &upstream_response[..]);
        assert_eq!(&response[12..16], &frame[16..20]);
        assert_eq!(&response[16..20], &frame[12..16]);
        assert_eq!(&response[20..22], &frame[22..24]);
        assert_eq!(&response[22..24], &frame[20..22]);
        assert_eq!(checksum(&response[..20]), 0);
    }

    #[tokio::test]
    async fn upstream_failure_writes_nothing() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.expect("shouldn't have failed");
        let engine = FilterEngine::new(
            Arc::new(InMemoryAllowListStore::new(["quran.com"])),
            UpstreamForwarder::new(
                vec![silent.local_addr().expect("shouldn't have failed")],
                Duration::from_millis(100),
            ),
        );

        let frame = build_query_frame(&FrameSpec::default(), 1, "quran.com");
        let FrameAction::Forward(job) = engine.process_frame(&frame) else {
            panic!("expected a forward");
        };
        assert!(engine.forward(job).await.is_none());
        assert_eq!(engine.stats().snapshot().upstream_failures, 1);
    }
}
