use crate::dns::exchange::{ExchangeError, Exchanger};
use async_trait::async_trait;
use hickory_proto::{
    op::{Message, MessageType},
    rr::{
        rdata::{A, NS},
        Name, RData, Record, RecordType,
    },
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

/// A wire A record for tests.
pub fn a(name: &str, ip: &str, ttl: u32) -> Record {
    Record::from_rdata(
        Name::from_ascii(name).unwrap(),
        ttl,
        RData::A(A(ip.parse().unwrap())),
    )
}

/// A wire NS record for tests.
pub fn ns(zone: &str, target: &str, ttl: u32) -> Record {
    Record::from_rdata(
        Name::from_ascii(zone).unwrap(),
        ttl,
        RData::NS(NS(Name::from_ascii(target).unwrap())),
    )
}

/// Builds a response to `query` with the given sections.
pub fn respond(
    query: &Message,
    answers: Vec<Record>,
    authorities: Vec<Record>,
    additionals: Vec<Record>,
) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_authoritative(true);
    for question in query.queries() {
        response.add_query(question.clone());
    }
    response.add_answers(answers);
    response.add_name_servers(authorities);
    response.add_additionals(additionals);
    response
}

#[derive(Clone)]
enum FakeResponse {
    Records {
        answers: Vec<Record>,
        authorities: Vec<Record>,
        additionals: Vec<Record>,
    },
    Timeout,
    Hang,
}

type Question = (IpAddr, String, RecordType);

/// Fake nameserver network for testing.
///
/// Responses are configured per (server address, query name, query type).
/// Questions with no configured response get an empty answer.
#[derive(Default)]
pub struct FakeExchanger {
    responses: Arc<Mutex<HashMap<Question, FakeResponse>>>,
    attempts: Arc<Mutex<Vec<(SocketAddr, String, RecordType)>>>,
}

impl FakeExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, server: &str, qname: &str, qtype: RecordType, response: FakeResponse) {
        let server: IpAddr = server.parse().unwrap();
        let qname = crate::core::to_lower_fqdn(qname);
        self.responses
            .lock()
            .unwrap()
            .insert((server, qname, qtype), response);
    }

    /// `server` answers `qname`/`qtype` with `answers`.
    pub fn add_answer(&self, server: &str, qname: &str, qtype: RecordType, answers: Vec<Record>) {
        self.insert(
            server,
            qname,
            qtype,
            FakeResponse::Records {
                answers,
                authorities: Vec::new(),
                additionals: Vec::new(),
            },
        );
    }

    /// `server` refers `qname`/`qtype` to the nameservers in `authorities`.
    pub fn add_referral(
        &self,
        server: &str,
        qname: &str,
        qtype: RecordType,
        authorities: Vec<Record>,
        glue: Vec<Record>,
    ) {
        self.insert(
            server,
            qname,
            qtype,
            FakeResponse::Records {
                answers: Vec::new(),
                authorities,
                additionals: glue,
            },
        );
    }

    /// `server` times out on `qname`/`qtype`.
    pub fn add_timeout(&self, server: &str, qname: &str, qtype: RecordType) {
        self.insert(server, qname, qtype, FakeResponse::Timeout);
    }

    /// `server` never responds to `qname`/`qtype`.
    pub fn add_hang(&self, server: &str, qname: &str, qtype: RecordType) {
        self.insert(server, qname, qtype, FakeResponse::Hang);
    }

    /// Every exchange attempted so far, in order.
    pub fn attempts(&self) -> Vec<(SocketAddr, String, RecordType)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl Exchanger for FakeExchanger {
    async fn exchange(&self, server: SocketAddr, query: &Message) -> Result<Message, ExchangeError> {
        let question = query
            .queries()
            .first()
            .ok_or_else(|| ExchangeError::Proto("query without a question".to_string()))?;
        let qname = crate::core::to_lower_fqdn(&question.name().to_ascii());
        let qtype = question.query_type();

        self.attempts
            .lock()
            .unwrap()
            .push((server, qname.clone(), qtype));

        let configured = self
            .responses
            .lock()
            .unwrap()
            .get(&(server.ip(), qname, qtype))
            .cloned();

        match configured {
            Some(FakeResponse::Records {
                answers,
                authorities,
                additionals,
            }) => Ok(respond(query, answers, authorities, additionals)),
            Some(FakeResponse::Timeout) => Err(ExchangeError::Timeout),
            Some(FakeResponse::Hang) => std::future::pending().await,
            None => Ok(respond(query, Vec::new(), Vec::new(), Vec::new())),
        }
    }
}
