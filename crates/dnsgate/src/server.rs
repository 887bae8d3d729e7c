use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::allowlist::AllowListStore;
use crate::engine::{FilterEngine, FrameAction, ForwardJob};
use crate::interface::{read_frames, FrameSink, ShutdownHandle};
use crate::stats::StatsSnapshot;

/// Largest frame an IPv4 interface can hand over
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65535;

pub struct FilterServer<S> {
    engine: Arc<FilterEngine<S>>,
    max_frame_size: usize,
}

impl<S: AllowListStore> FilterServer<S> {
    pub fn new(engine: Arc<FilterEngine<S>>, max_frame_size: usize) -> Self {
        FilterServer {
            engine,
            max_frame_size,
        }
    }

    pub fn engine(&self) -> &Arc<FilterEngine<S>> {
        &self.engine
    }

    /// Filters frames read from `reader` and writes responses to `writer`
    /// until the interface closes or `shutdown` is raised.
    ///
    /// Reads happen on a dedicated thread. Allowed queries are forwarded on
    /// their own tasks, which are all awaited before returning.
    pub async fn run<R, W>(&self, reader: R, writer: W, shutdown: ShutdownHandle) -> anyhow::Result<StatsSnapshot>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let sink = Arc::new(FrameSink::new(writer));
        let (job_tx, mut job_rx) = unbounded_channel::<ForwardJob>();

        let engine = self.engine.clone();
        let reader_sink = sink.clone();
        let max_frame_size = self.max_frame_size;
        let reader_thread = std::thread::Builder::new()
            .name("dnsgate-reader".to_owned())
            .spawn(move || {
                let exit = read_frames(reader, max_frame_size, &shutdown, |frame| {
                    match engine.process_frame(frame) {
                        FrameAction::Respond(response) => reader_sink.send(&response),
                        FrameAction::Forward(job) => {
                            if job_tx.send(job).is_err() {
                                tracing::debug!("Forward dispatcher is gone, dropping a query");
                            }
                        }
                        FrameAction::Ignore | FrameAction::Malformed => {}
                    }
                });
                tracing::debug!(?exit, "Read loop finished");
            })
            .context("failed to spawn the read thread")?;

        let mut forwards = JoinSet::new();
        loop {
            tokio::select! {
                job = job_rx.recv() => {
                    // Closed once the read thread is done
                    let Some(job) = job else { break };
                    let span = tracing::trace_span!("forward", id = job.id);
                    let engine = self.engine.clone();
                    let sink = sink.clone();
                    forwards.spawn(
                        async move {
                            if let Some(response) = engine.forward(job).await {
                                sink.send(&response);
                            }
                        }
                        .instrument(span),
                    );
                }
                Some(result) = forwards.join_next() => {
                    if let Err(e) = result {
                        tracing::error!("Forward task failed to execute: {}", e);
                    }
                }
            }
        }

        tracing::debug!(in_flight = forwards.len(), "Waiting for in-flight forwards");
        while let Some(result) = forwards.join_next().await {
            if let Err(e) = result {
                tracing::error!("Forward task failed to execute: {}", e);
            }
        }

        tokio::task::spawn_blocking(move || reader_thread.join())
            .await
            .context("failed to join the read thread")?
            .map_err(|_| anyhow::anyhow!("the read thread panicked"))?;

        Ok(self.engine.stats().snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    use dnsgate_lib::test_utils::{build_ipv4_udp_frame, build_query_frame, FrameSpec};
    use dnsgate_lib::{checksum, DnsQuery, Ipv4Header, ResponseCode, UdpHeader};
    use tokio::net::UdpSocket;

    use super::*;
    use crate::allowlist::InMemoryAllowListStore;
    use crate::upstream::UpstreamForwarder;

    /// Hands out one queued frame per read, then reports the interface as
    /// closed once the sender is dropped.
    struct FrameReader(mpsc::Receiver<Vec<u8>>);

    impl Read for FrameReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    fn frame_reader(frames: Vec<Vec<u8>>) -> FrameReader {
        let (tx, rx) = mpsc::channel();
        frames.into_iter().for_each(|frame| tx.send(frame).expect("shouldn't have failed"));
        FrameReader(rx)
    }

    #[derive(Clone, Default)]
    struct CapturedFrames(Arc<Mutex<Vec<Vec<u8>>>>);

    impl CapturedFrames {
        fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.0.lock().expect("lock poisoned"))
        }
    }

    impl Write for CapturedFrames {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock poisoned").push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn server(entries: &[&str], resolvers: Vec<SocketAddr>, timeout: Duration) -> FilterServer<InMemoryAllowListStore> {
        let engine = FilterEngine::new(
            Arc::new(InMemoryAllowListStore::new(entries)),
            UpstreamForwarder::new(resolvers, timeout),
        );
        FilterServer::new(Arc::new(engine), DEFAULT_MAX_FRAME_SIZE)
    }

    /// Answers every query with the QR bit set. With `hold_until`, replies are
    /// held back until that many queries arrived and then sent in reverse.
    async fn spawn_resolver(hold_until: usize) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("shouldn't have failed");
        let addr = socket.local_addr().expect("shouldn't have failed");
        tokio::spawn(async move {
            let mut buf = vec![0; 512];
            let mut pending = Vec::new();
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let mut response = buf[..len].to_vec();
                response[2] |= 0x80;
                pending.push((response, from));
                if pending.len() >= hold_until {
                    for (response, from) in pending.drain(..).rev() {
                        let _ = socket.send_to(&response, from).await;
                    }
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn relays_allowed_query() {
        let resolver = spawn_resolver(1).await;
        let server = server(&["quran.com"], vec![resolver], Duration::from_secs(2));
        let spec = FrameSpec::default();
        let query = build_query_frame(&spec, 0x4242, "www.quran.com");

        let writer = CapturedFrames::default();
        let stats = server
            .run(frame_reader(vec![query.clone()]), writer.clone(), ShutdownHandle::new())
            .await
            .expect("shouldn't have failed");

        let responses = writer.take();
        assert_eq!(responses.len(), 1);
        let response = &responses[0];

        let ip_header = Ipv4Header::new(response).expect("shouldn't have failed");
        assert_eq!(ip_header.source(), spec.destination);
        assert_eq!(ip_header.destination(), spec.source);
        assert_eq!(ip_header.total_len() as usize, response.len());
        assert_eq!(checksum(&response[..20]), 0);

        let udp_header = UdpHeader::new(&response[20..]).expect("shouldn't have failed");
        assert_eq!(udp_header.source_port(), spec.destination_port);
        assert_eq!(udp_header.destination_port(), spec.source_port);

        let mut expected_payload = query[28..].to_vec();
        expected_payload[2] |= 0x80;
        assert_eq!(&response[28..], &expected_payload[..]);

        assert_eq!(stats.queries_total, 1);
        assert_eq!(stats.queries_forwarded, 1);
        assert_eq!(stats.queries_blocked, 0);
    }

    #[tokio::test]
    async fn answers_nxdomain_for_unlisted_domain() {
        let server = server(&[], Vec::new(), Duration::from_secs(1));
        let query = build_query_frame(&FrameSpec::default(), 0x0102, "example.com");

        let writer = CapturedFrames::default();
        let stats = server
            .run(frame_reader(vec![query.clone()]), writer.clone(), ShutdownHandle::new())
            .await
            .expect("shouldn't have failed");

        let responses = writer.take();
        assert_eq!(responses.len(), 1);
        let message = DnsQuery::parse(&responses[0][28..]).expect("shouldn't have failed");
        assert_eq!(message.id(), 0x0102);
        assert!(message.header.is_response);
        assert_eq!(message.header.response_code, ResponseCode::NameError);
        assert_eq!(message.qname, "example.com");
        assert_eq!(&responses[0][40..], &query[40..]);
        assert_eq!(stats.queries_blocked, 1);
    }

    #[tokio::test]
    async fn pairs_concurrent_responses_completed_out_of_order() {
        const QUERIES: u16 = 8;
        let resolver = spawn_resolver(QUERIES as usize).await;
        let server = server(&["example.org"], vec![resolver], Duration::from_secs(5));

        let frames = (0..QUERIES)
            .map(|idx| {
                let spec = FrameSpec {
                    source_port: 40000 + idx,
                    ..Default::default()
                };
                build_query_frame(&spec, 0x100 + idx, &format!("host{}.example.org", idx))
            })
            .collect();

        let writer = CapturedFrames::default();
        let stats = server
            .run(frame_reader(frames), writer.clone(), ShutdownHandle::new())
            .await
            .expect("shouldn't have failed");

        let responses = writer.take();
        assert_eq!(responses.len(), QUERIES as usize);

        let paired: HashSet<(u16, u16)> = responses
            .iter()
            .map(|response| {
                assert_eq!(checksum(&response[..20]), 0);
                let port = UdpHeader::new(&response[20..]).expect("shouldn't have failed").destination_port();
                let id = u16::from_be_bytes([response[28], response[29]]);
                (port, id)
            })
            .collect();
        let expected: HashSet<(u16, u16)> = (0..QUERIES).map(|idx| (40000 + idx, 0x100 + idx)).collect();
        assert_eq!(paired, expected);
        assert_eq!(stats.queries_forwarded, QUERIES as u64);
    }

    #[tokio::test]
    async fn drops_what_it_cannot_answer() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.expect("shouldn't have failed");
        let server = server(
            &["quran.com"],
            vec![silent.local_addr().expect("shouldn't have failed")],
            Duration::from_millis(100),
        );

        let spec = FrameSpec::default();
        let not_dns = build_ipv4_udp_frame(
            &FrameSpec {
                destination_port: 123,
                ..Default::default()
            },
            b"ntp",
        );
        let malformed = build_ipv4_udp_frame(&spec, &[0xff; 5]);
        let allowed = build_query_frame(&spec, 1, "quran.com");
        let blocked = build_query_frame(&spec, 2, "example.com");

        let writer = CapturedFrames::default();
        let stats = server
            .run(
                frame_reader(vec![not_dns, malformed, allowed, blocked]),
                writer.clone(),
                ShutdownHandle::new(),
            )
            .await
            .expect("shouldn't have failed");

        // Only the NXDOMAIN, the allowed query timed out upstream
        let responses = writer.take();
        assert_eq!(responses.len(), 1);
        assert_eq!(u16::from_be_bytes([responses[0][28], responses[0][29]]), 2);

        assert_eq!(
            stats,
            StatsSnapshot {
                queries_total: 3,
                queries_blocked: 1,
                queries_malformed: 1,
                queries_forwarded: 1,
                upstream_failures: 1,
            }
        );
    }

    #[tokio::test]
    async fn stop_flag_ends_the_read_loop() {
        let server = server(&[], Vec::new(), Duration::from_secs(1));
        let (_tx, rx) = mpsc::channel();
        let shutdown = ShutdownHandle::new();
        shutdown.stop();

        let writer = CapturedFrames::default();
        let stats = server
            .run(FrameReader(rx), writer.clone(), shutdown)
            .await
            .expect("shouldn't have failed");
        assert!(writer.take().is_empty());
        assert_eq!(stats, StatsSnapshot::default());
    }
}
