//! Iterative resolution from the root.
//!
//! The nameservers for a name's parent zone are found by recursing on the
//! parent (down to the root hints), then the name itself is queried against
//! them without recursion. Responses that delegate to a zone closer to the
//! query name are followed by re-querying that zone's nameservers.

use crate::{
    cache::TtlCache,
    config::ResolverConfig,
    context::ResolveContext,
    convert::convert_record,
    core::{is_root, is_subdomain, parent, record_key, to_lower_fqdn, Record, Resolution, Resolver, ROOT},
    dns::{
        exchange::{build_query, ExchangeError, Exchanger, UdpExchanger},
        trace::{TraceEvent, TraceSink},
        ResolveError,
    },
    root::{seed_root_cache, RootHints, RootHintsError},
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use hickory_proto::{
    op::Message,
    rr::{Name, Record as WireRecord, RecordType},
};
use std::{
    collections::{BTreeMap, HashSet},
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, instrument, trace, warn};

/// Sweep period for a cache the resolver creates itself.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Parses a query type mnemonic, case-insensitively.
pub fn parse_query_type(qtype: &str) -> Result<RecordType, ResolveError> {
    RecordType::from_str(&qtype.to_ascii_uppercase())
        .map_err(|_| ResolveError::InvalidQueryType(qtype.to_string()))
}

/// A candidate cap that dropped nameservers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cap {
    Nameservers,
    Ips,
}

/// Nameserver addresses to try for one zone cut, in order.
#[derive(Debug, Clone, Default)]
struct Candidates {
    addrs: Vec<SocketAddr>,
    /// The first cap that dropped candidates, if any.
    capped: Option<Cap>,
}

impl Candidates {
    fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// The closest zone known to enclose a name, and its nameservers.
#[derive(Debug, Clone)]
struct Delegation {
    zone: String,
    candidates: Candidates,
}

/// States of the query loop for a single name.
///
/// `bailiwick` is the zone whose nameservers produced the data; only records
/// at or below it are cached.
enum Step {
    /// Query the nameservers of `delegation.zone`.
    AtParentNs(Delegation),
    Answer {
        bailiwick: String,
        resolution: Resolution,
    },
    /// A nameserver delegated to `zone`, which is closer to the query name.
    Referral {
        bailiwick: String,
        zone: String,
        delegation: Resolution,
    },
    Exhausted {
        tried: usize,
        failures: usize,
        capped: Option<Cap>,
    },
}

/// Iterative resolver over a root cache seeded from hints and a general
/// write-through cache of learned records.
pub struct IterativeResolver {
    config: ResolverConfig,
    root: TtlCache,
    cache: Arc<TtlCache>,
    exchanger: Arc<dyn Exchanger>,
    sink: Option<Arc<dyn TraceSink>>,
    /// Stops the sweeper of a resolver-owned cache when the resolver drops.
    _sweeper_shutdown: Option<watch::Sender<bool>>,
}

#[derive(Default)]
pub struct IterativeResolverBuilder {
    config: ResolverConfig,
    root_hints: Option<RootHints>,
    cache: Option<Arc<TtlCache>>,
    sweep_interval: Option<Duration>,
    exchanger: Option<Arc<dyn Exchanger>>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl IterativeResolverBuilder {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Root hints to seed the root cache with. Defaults to the embedded hints.
    pub fn root_hints(mut self, hints: RootHints) -> Self {
        self.root_hints = Some(hints);
        self
    }

    /// General cache shared with the caller, e.g. for persistence.
    ///
    /// The caller owns sweeping a shared cache; see [`TtlCache::spawn_sweeper`].
    pub fn cache(mut self, cache: Arc<TtlCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sweep period for the cache the resolver creates when none is shared.
    /// Defaults to [`DEFAULT_SWEEP_INTERVAL`].
    pub fn sweep_interval(mut self, period: Duration) -> Self {
        self.sweep_interval = Some(period);
        self
    }

    pub fn exchanger(mut self, exchanger: Arc<dyn Exchanger>) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Seeds the root cache and assembles the resolver.
    ///
    /// When no cache is shared and a tokio runtime is running, the resolver's
    /// own cache is swept in the background until the resolver is dropped.
    /// Fails only if the embedded hints cannot be parsed.
    pub fn build(self) -> Result<IterativeResolver, RootHintsError> {
        let hints = match self.root_hints {
            Some(hints) => hints,
            None => RootHints::embedded()?,
        };
        let root = TtlCache::new();
        seed_root_cache(&root, &hints);

        let exchanger = self
            .exchanger
            .unwrap_or_else(|| Arc::new(UdpExchanger::from_config(&self.config)) as Arc<dyn Exchanger>);

        let (cache, sweeper_shutdown) = match self.cache {
            Some(cache) => (cache, None),
            None => {
                let cache = Arc::new(TtlCache::new());
                let period = self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL);
                (cache.clone(), spawn_owned_sweeper(&cache, period))
            }
        };

        Ok(IterativeResolver {
            config: self.config,
            root,
            cache,
            exchanger,
            sink: self.sink,
            _sweeper_shutdown: sweeper_shutdown,
        })
    }
}

impl IterativeResolver {
    pub fn builder() -> IterativeResolverBuilder {
        IterativeResolverBuilder::default()
    }

    /// A resolver with default settings, embedded root hints and UDP transport.
    pub fn new(config: ResolverConfig) -> Result<Self, RootHintsError> {
        Self::builder().config(config).build()
    }

    /// The cache seeded from root hints.
    pub fn root_cache(&self) -> &TtlCache {
        &self.root
    }

    /// The general cache learned records are written to.
    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    fn emit(&self, event: TraceEvent) {
        if let Some(sink) = &self.sink {
            sink.record(&event);
        }
    }

    fn guard(&self, ctx: &ResolveContext, depth: usize) -> Result<(), ResolveError> {
        if depth > self.config.max_recursion {
            warn!(depth, "Maximum recursion depth reached");
            return Err(ResolveError::MaxRecursion(self.config.max_recursion));
        }
        ctx.check()
    }

    /// Resolves `qname`/`qtype`, recursing on the parent zone for nameservers.
    fn lookup<'a>(
        &'a self,
        ctx: &'a ResolveContext,
        qname: String,
        qtype: RecordType,
        depth: usize,
    ) -> BoxFuture<'a, Result<Resolution, ResolveError>> {
        async move {
            self.guard(ctx, depth)?;

            if qtype == RecordType::NS {
                if let Some(hinted) = self.hinted(&qname) {
                    return Ok(hinted);
                }
                if is_root(&qname) {
                    return Err(ResolveError::NoRootNameservers);
                }
            }
            if let Some(cached) = self.cached(&qname, qtype) {
                return Ok(cached);
            }

            // The root itself is served by the root nameservers.
            let zone = parent(&qname).unwrap_or_else(|| ROOT.to_string());
            let delegation = self.zone_servers(ctx, zone, depth + 1).await?;
            self.iterate(ctx, &qname, qtype, delegation, depth + 1).await
        }
        .boxed()
    }

    /// Finds the nameservers of `zone`, or of its closest enclosing zone cut.
    fn zone_servers<'a>(
        &'a self,
        ctx: &'a ResolveContext,
        zone: String,
        depth: usize,
    ) -> BoxFuture<'a, Result<Delegation, ResolveError>> {
        async move {
            self.guard(ctx, depth)?;

            if let Some(hinted) = self.hinted(&zone) {
                let candidates = self.candidates(ctx, &hinted, depth).await?;
                return Ok(Delegation { zone, candidates });
            }
            if let Some(cached) = self.cached(&zone, RecordType::NS) {
                let candidates = self.candidates(ctx, &cached, depth).await?;
                if !candidates.is_empty() {
                    return Ok(Delegation { zone, candidates });
                }
            }

            // Only the root has no parent, and it has no hinted nameservers.
            let Some(enclosing_zone) = parent(&zone) else {
                return Err(ResolveError::NoRootNameservers);
            };
            let enclosing = self.zone_servers(ctx, enclosing_zone, depth + 1).await?;
            let nameservers = self
                .iterate(ctx, &zone, RecordType::NS, enclosing.clone(), depth + 1)
                .await?;
            let candidates = self.candidates(ctx, &nameservers, depth + 1).await?;

            if candidates.is_empty() {
                debug!(%zone, enclosing = %enclosing.zone, "No delegation found, staying with enclosing zone");
                Ok(enclosing)
            } else {
                Ok(Delegation { zone, candidates })
            }
        }
        .boxed()
    }

    /// Runs the query loop for `qname` starting at `delegation`.
    async fn iterate(
        &self,
        ctx: &ResolveContext,
        qname: &str,
        qtype: RecordType,
        delegation: Delegation,
        mut depth: usize,
    ) -> Result<Resolution, ResolveError> {
        let mut step = Step::AtParentNs(delegation);
        loop {
            step = match step {
                Step::AtParentNs(delegation) => self.query(ctx, qname, qtype, delegation).await?,
                Step::Answer {
                    bailiwick,
                    resolution,
                } => {
                    self.remember(&resolution, &bailiwick);
                    return Ok(resolution);
                }
                Step::Referral {
                    bailiwick,
                    zone,
                    delegation,
                } => {
                    self.remember(&delegation, &bailiwick);
                    if qtype == RecordType::NS && zone == qname {
                        return Ok(delegation);
                    }
                    depth += 1;
                    self.guard(ctx, depth)?;
                    let candidates = self.candidates(ctx, &delegation, depth).await?;
                    Step::AtParentNs(Delegation { zone, candidates })
                }
                Step::Exhausted {
                    tried,
                    failures,
                    capped,
                } => {
                    self.emit(TraceEvent::Exhausted {
                        qname: qname.to_string(),
                        qtype: qtype.to_string(),
                    });
                    if tried > 0 && failures == tried {
                        match capped {
                            Some(Cap::Nameservers) => {
                                return Err(ResolveError::MaxNameservers(self.config.max_nameservers))
                            }
                            Some(Cap::Ips) => return Err(ResolveError::MaxIps(self.config.max_ips)),
                            None => {}
                        }
                    }
                    debug!(qname, %qtype, tried, "Delegation chain exhausted without an answer");
                    return Ok(Resolution::default());
                }
            };
        }
    }

    /// Tries each candidate in turn; the first answer or referral wins.
    async fn query(
        &self,
        ctx: &ResolveContext,
        qname: &str,
        qtype: RecordType,
        delegation: Delegation,
    ) -> Result<Step, ResolveError> {
        let name = Name::from_ascii(qname)
            .map_err(|e| ResolveError::InvalidName(format!("{qname}: {e}")))?;
        let type_name = qtype.to_string();
        let mut failures = 0;

        for &nameserver in &delegation.candidates.addrs {
            if let Some(remaining) = ctx.remaining() {
                if remaining < self.config.typical_response_time() {
                    return Err(ResolveError::DeadlineExceeded);
                }
            }

            self.emit(TraceEvent::Query {
                qname: qname.to_string(),
                qtype: type_name.clone(),
                nameserver,
            });
            debug!(%nameserver, qname, qtype = %type_name, zone = %delegation.zone, "Querying nameserver");

            let query = build_query(name.clone(), qtype);
            let response = match ctx.run(self.exchanger.exchange(nameserver, &query)).await? {
                Ok(response) => response,
                Err(e) => {
                    let status = if matches!(e, ExchangeError::Timeout) {
                        "timeout"
                    } else {
                        "failure"
                    };
                    metrics::counter!("dns_queries_total", "status" => status).increment(1);
                    debug!(%nameserver, error = %e, "Exchange failed, trying next nameserver");
                    self.emit(TraceEvent::Failure {
                        nameserver,
                        error: e.to_string(),
                    });
                    failures += 1;
                    continue;
                }
            };
            metrics::counter!("dns_queries_total", "status" => "success").increment(1);

            let answers = convert_all(response.answers());
            if !answers.is_empty() {
                self.emit(TraceEvent::Answer {
                    nameserver,
                    records: answers.len(),
                });
                return Ok(Step::Answer {
                    bailiwick: delegation.zone.clone(),
                    resolution: Resolution {
                        answers,
                        authorities: convert_all(response.name_servers()),
                        additionals: convert_all(response.additionals()),
                    },
                });
            }

            if let Some((zone, referral)) = closer_delegation(&response, qname, &delegation.zone) {
                self.emit(TraceEvent::Referral {
                    nameserver,
                    zone: zone.clone(),
                });
                return Ok(Step::Referral {
                    bailiwick: delegation.zone.clone(),
                    zone,
                    delegation: referral,
                });
            }

            debug!(%nameserver, qname, "Nameserver returned no usable data");
            self.emit(TraceEvent::Failure {
                nameserver,
                error: "no answer".to_string(),
            });
        }

        Ok(Step::Exhausted {
            tried: delegation.candidates.addrs.len(),
            failures,
            capped: delegation.candidates.capped,
        })
    }

    /// Turns nameserver records into addresses to query.
    ///
    /// Address records are used as-is. NS targets are looked up in the
    /// response's glue, then the caches, then resolved from scratch.
    async fn candidates(
        &self,
        ctx: &ResolveContext,
        nameservers: &Resolution,
        depth: usize,
    ) -> Result<Candidates, ResolveError> {
        let mut groups: Vec<(String, Vec<IpAddr>)> = Vec::new();
        for record in &nameservers.answers {
            let (owner, addr) = match record.rtype.as_str() {
                "A" | "AAAA" => (record.name.as_str(), record.value.parse::<IpAddr>().ok()),
                "NS" => (record.value.as_str(), None),
                _ => continue,
            };
            let index = match groups.iter().position(|(name, _)| name == owner) {
                Some(index) => index,
                None => {
                    groups.push((owner.to_string(), Vec::new()));
                    groups.len() - 1
                }
            };
            if let Some(addr) = addr {
                groups[index].1.push(addr);
            }
        }

        let mut capped = (groups.len() > self.config.max_nameservers).then_some(Cap::Nameservers);
        groups.truncate(self.config.max_nameservers);

        let mut addrs = Vec::new();
        let mut limit_error = None;
        for (ns_name, mut ips) in groups {
            if ips.is_empty() {
                ips = self.glue(&ns_name, &nameservers.additionals);
            }
            if ips.is_empty() {
                match self.lookup(ctx, ns_name.clone(), RecordType::A, depth + 1).await {
                    Ok(resolution) => ips = ipv4_addresses(resolution.answers.iter()),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(nameserver = %ns_name, error = %e, "Could not resolve nameserver address");
                        if e.is_limit() {
                            limit_error = Some(e);
                        }
                    }
                }
            }
            if ips.len() > self.config.max_ips {
                capped.get_or_insert(Cap::Ips);
                ips.truncate(self.config.max_ips);
            }
            addrs.extend(
                ips.into_iter()
                    .map(|ip| SocketAddr::new(ip, self.config.nameserver_port)),
            );
        }

        match limit_error {
            Some(e) if addrs.is_empty() => Err(e),
            _ => Ok(Candidates { addrs, capped }),
        }
    }

    /// Glue for `ns_name` from `additionals`, falling back to cached addresses.
    fn glue(&self, ns_name: &str, additionals: &[Record]) -> Vec<IpAddr> {
        let from_response = ipv4_addresses(additionals.iter().filter(|r| r.name == ns_name));
        if !from_response.is_empty() {
            return from_response;
        }

        let key = record_key(ns_name, "A");
        self.root
            .get(&key)
            .or_else(|| self.cache.get(&key))
            .map(|records| ipv4_addresses(records.iter()))
            .unwrap_or_default()
    }

    /// Root-hint nameserver addresses for `zone`, if the hints cover it.
    fn hinted(&self, zone: &str) -> Option<Resolution> {
        let nameservers = self.root.get(&record_key(zone, "NS"))?;
        let answers = nameservers
            .iter()
            .filter_map(|ns| self.root.get(&record_key(&ns.value, "A")))
            .flatten()
            .collect();
        Some(Resolution::from_answers(answers))
    }

    fn cached(&self, qname: &str, qtype: RecordType) -> Option<Resolution> {
        if !self.config.cache_read_through {
            return None;
        }
        let type_name = qtype.to_string();
        match self.cache.get(&record_key(qname, &type_name)) {
            Some(records) => {
                metrics::counter!("dns_cache_lookups_total", "result" => "hit").increment(1);
                trace!(qname, qtype = %type_name, "Serving from cache");
                self.emit(TraceEvent::CacheHit {
                    qname: qname.to_string(),
                    qtype: type_name,
                });
                Some(Resolution::from_answers(records))
            }
            None => {
                metrics::counter!("dns_cache_lookups_total", "result" => "miss").increment(1);
                None
            }
        }
    }

    /// Writes answers, and glue for answered nameservers, to the general cache.
    ///
    /// Records outside `bailiwick` are not cached; a server has no authority
    /// over them. Zero-TTL records are not cached either, since the cache
    /// would keep them forever.
    fn remember(&self, resolution: &Resolution, bailiwick: &str) {
        let nameservers: HashSet<&str> = resolution
            .answers
            .iter()
            .filter(|r| r.rtype == "NS")
            .map(|r| r.value.as_str())
            .collect();
        let glue = resolution
            .additionals
            .iter()
            .filter(|r| matches!(r.rtype.as_str(), "A" | "AAAA") && nameservers.contains(r.name.as_str()));

        let mut grouped: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for record in resolution.answers.iter().chain(glue) {
            if record.ttl.is_zero() {
                continue;
            }
            if !is_subdomain(&record.name, bailiwick) {
                debug!(record = %record.name, %bailiwick, "Not caching out-of-bailiwick record");
                continue;
            }
            grouped.entry(record.key()).or_default().push(record.clone());
        }
        for (key, records) in grouped {
            self.cache.set(key, records);
        }
    }
}

#[async_trait]
impl Resolver for IterativeResolver {
    #[instrument(skip_all, fields(qname = %qname, qtype = %qtype))]
    async fn resolve_ctx(
        &self,
        ctx: &ResolveContext,
        qname: &str,
        qtype: &str,
    ) -> Result<Resolution, ResolveError> {
        let rtype = parse_query_type(qtype)?;
        Name::from_ascii(qname).map_err(|e| ResolveError::InvalidName(format!("{qname}: {e}")))?;

        let start_time = Instant::now();
        let result = self.lookup(ctx, to_lower_fqdn(qname), rtype, 0).await;
        metrics::histogram!("dns_resolution_duration_seconds")
            .record(start_time.elapsed().as_secs_f64());

        if let Err(e) = &result {
            debug!(error = %e, "Resolution failed");
        }
        result
    }
}

fn convert_all(records: &[WireRecord]) -> Vec<Record> {
    records
        .iter()
        .filter_map(|record| convert_record(record, true))
        .collect()
}

fn ipv4_addresses<'r>(records: impl Iterator<Item = &'r Record>) -> Vec<IpAddr> {
    records
        .filter(|r| r.rtype == "A")
        .filter_map(|r| r.value.parse().ok())
        .collect()
}

/// Detects a referral to a zone strictly between `zone` and `qname`.
///
/// Returns the new zone and a resolution holding its NS records as answers
/// and the response's in-bailiwick glue as additionals.
fn closer_delegation(response: &Message, qname: &str, zone: &str) -> Option<(String, Resolution)> {
    let authorities = convert_all(response.name_servers());
    let cut = authorities.iter().find(|r| r.rtype == "NS")?.name.clone();
    if cut == to_lower_fqdn(zone) || !is_subdomain(&cut, zone) || !is_subdomain(qname, &cut) {
        return None;
    }

    let answers = authorities
        .into_iter()
        .filter(|r| r.rtype == "NS" && r.name == cut)
        .collect();
    Some((
        cut,
        Resolution {
            answers,
            authorities: Vec::new(),
            additionals: convert_all(response.additionals())
                .into_iter()
                .filter(|r| is_subdomain(&r.name, zone))
                .collect(),
        },
    ))
}

/// Sweeps `cache` every `period` on the current runtime, if there is one.
///
/// The returned sender stops the task when dropped.
fn spawn_owned_sweeper(cache: &Arc<TtlCache>, period: Duration) -> Option<watch::Sender<bool>> {
    if tokio::runtime::Handle::try_current().is_err() {
        debug!("No tokio runtime, resolver cache will not be swept");
        return None;
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    cache.spawn_sweeper(period, shutdown_rx);
    Some(shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::test_utils::{a, ns, respond};
    use hickory_proto::op::Query;

    fn query_for(qname: &str) -> Message {
        let mut message = Message::new();
        message.add_query(Query::query(Name::from_ascii(qname).unwrap(), RecordType::A));
        message
    }

    #[test]
    fn test_parse_query_type() {
        assert_eq!(parse_query_type("ns").unwrap(), RecordType::NS);
        assert_eq!(parse_query_type("AAAA").unwrap(), RecordType::AAAA);
        assert_eq!(
            parse_query_type("ZZZZ"),
            Err(ResolveError::InvalidQueryType("ZZZZ".to_string()))
        );
    }

    #[test]
    fn test_closer_delegation_is_followed() {
        let response = respond(
            &query_for("www.example.com."),
            vec![],
            vec![ns("example.com.", "ns1.example.com.", 3600)],
            vec![a("ns1.example.com.", "192.0.2.1", 3600)],
        );

        let (zone, delegation) = closer_delegation(&response, "www.example.com.", "com.").unwrap();

        assert_eq!(zone, "example.com.");
        assert_eq!(delegation.answers[0].value, "ns1.example.com.");
        assert_eq!(delegation.additionals[0].value, "192.0.2.1");
    }

    #[test]
    fn test_upward_or_sideways_referral_is_ignored() {
        let upward = respond(
            &query_for("www.example.com."),
            vec![],
            vec![ns("com.", "a.gtld-servers.net.", 3600)],
            vec![],
        );
        assert!(closer_delegation(&upward, "www.example.com.", "com.").is_none());

        let sideways = respond(
            &query_for("www.example.com."),
            vec![],
            vec![ns("example.net.", "ns1.example.net.", 3600)],
            vec![],
        );
        assert!(closer_delegation(&sideways, "www.example.com.", "com.").is_none());
    }
}
