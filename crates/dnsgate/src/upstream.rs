use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest UDP payload an IPv4 datagram can carry
const MAX_UDP_PAYLOAD: usize = 65_507;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no upstream resolver is configured")]
    NoResolvers,
    #[error("upstream resolver {resolver} didn't answer within {timeout:?}")]
    Timeout { resolver: SocketAddr, timeout: Duration },
    #[error("UDP: error while exchanging a query with {resolver}: {source}")]
    Io {
        resolver: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Relays raw DNS queries to an ordered list of upstream resolvers.
#[derive(Debug, Clone)]
pub struct UpstreamForwarder {
    resolvers: Vec<SocketAddr>,
    timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(resolvers: Vec<SocketAddr>, timeout: Duration) -> Self {
        UpstreamForwarder { resolvers, timeout }
    }

    pub fn resolvers(&self) -> &[SocketAddr] {
        &self.resolvers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `query` unchanged to each resolver in turn and returns the first
    /// datagram received back, verbatim.
    ///
    /// Resolvers are tried one after another, never raced. The error of the
    /// last resolver is returned when none of them answered.
    pub async fn forward(&self, query: &[u8]) -> Result<Vec<u8>, ForwardError> {
        let mut last_error = ForwardError::NoResolvers;
        for &resolver in self.resolvers.iter() {
            match self.exchange(query, resolver).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!(%resolver, "Error while forwarding a query: {}", e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn exchange(&self, query: &[u8], resolver: SocketAddr) -> Result<Vec<u8>, ForwardError> {
        let io_error = |source: io::Error| ForwardError::Io { resolver, source };

        // Fresh ephemeral socket per query, so a misbehaving exchange can't affect others
        let bind_addr = match resolver {
            SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            SocketAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(io_error)?;
        socket.connect(resolver).await.map_err(io_error)?;
        socket.send(query).await.map_err(io_error)?;

        let mut response = vec![0; MAX_UDP_PAYLOAD];
        let response_length = tokio::time::timeout(self.timeout, socket.recv(&mut response))
            .await
            .map_err(|_| ForwardError::Timeout {
                resolver,
                timeout: self.timeout,
            })?
            .map_err(io_error)?;
        response.truncate(response_length);

        Ok(response)
    }
}
