//! Wire exchange with a single nameserver.
//!
//! The [`Exchanger`] trait is the seam between the iterative resolver and the
//! network. [`UdpExchanger`] sends the query over UDP and repeats it over TCP
//! when the answer comes back truncated.

use crate::config::ResolverConfig;
use async_trait::async_trait;
use hickory_proto::{
    op::{Message, MessageType, OpCode, Query},
    rr::{Name, RecordType},
    ProtoError,
};
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time::timeout,
};
use tracing::trace;

/// Receive buffer for UDP responses.
const MAX_UDP_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("timeout expired")]
    Timeout,

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Proto(String),
}

impl From<ProtoError> for ExchangeError {
    fn from(e: ProtoError) -> Self {
        Self::Proto(e.to_string())
    }
}

/// Sends one query to one nameserver and returns its response.
#[async_trait]
pub trait Exchanger: Send + Sync {
    async fn exchange(&self, server: SocketAddr, query: &Message) -> Result<Message, ExchangeError>;
}

/// Builds a non-recursive (RD unset) query for `name`/`qtype`.
pub fn build_query(name: Name, qtype: RecordType) -> Message {
    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false);
    message.add_query(Query::query(name, qtype));
    message
}

#[derive(Debug, Clone)]
pub struct UdpExchanger {
    query_timeout: Duration,
    exchange_timeout: Duration,
    tcp_retry: bool,
}

impl UdpExchanger {
    pub fn new(query_timeout: Duration, exchange_timeout: Duration, tcp_retry: bool) -> Self {
        Self {
            query_timeout,
            exchange_timeout,
            tcp_retry,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(config.timeout(), config.exchange_timeout(), config.tcp_retry)
    }

    async fn exchange_inner(&self, server: SocketAddr, query: &Message) -> Result<Message, ExchangeError> {
        let wire = query.to_vec()?;
        let response = self.query_udp(server, &wire, query.id()).await?;
        if response.truncated() && self.tcp_retry {
            trace!(%server, "Response truncated, retrying over TCP");
            return self.query_tcp(server, &wire, query.id()).await;
        }
        Ok(response)
    }

    async fn query_udp(&self, server: SocketAddr, wire: &[u8], id: u16) -> Result<Message, ExchangeError> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server).await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            let len = timeout(self.query_timeout, socket.recv(&mut buf))
                .await
                .map_err(|_| ExchangeError::Timeout)??;
            let response = Message::from_vec(&buf[..len])?;
            if response.id() == id {
                return Ok(response);
            }
            trace!(%server, expected = id, got = response.id(), "Discarding response with mismatched id");
        }
    }

    async fn query_tcp(&self, server: SocketAddr, wire: &[u8], id: u16) -> Result<Message, ExchangeError> {
        let len = u16::try_from(wire.len())
            .map_err(|_| ExchangeError::Proto("query too large for TCP framing".to_string()))?;

        let mut stream = TcpStream::connect(server).await?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(wire).await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len_buf))];
        stream.read_exact(&mut buf).await?;

        let response = Message::from_vec(&buf)?;
        if response.id() != id {
            return Err(ExchangeError::Proto(format!(
                "response id {} does not match query id {}",
                response.id(),
                id
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Exchanger for UdpExchanger {
    async fn exchange(&self, server: SocketAddr, query: &Message) -> Result<Message, ExchangeError> {
        timeout(self.exchange_timeout, self.exchange_inner(server, query))
            .await
            .map_err(|_| ExchangeError::Timeout)?
    }
}
