//! Orchestration : une chaîne séquentielle par adresse (syntaxe → MX →
//! sonde/catch-all → score), plusieurs adresses en parallèle.
//!
//! Les caches MX et catch-all vivent aussi longtemps que le moteur et sont
//! partagés par tous les lots. Les plafonds de connexions, l'espacement par
//! domaine et le jeton d'interruption appartiennent au lot : créés à son
//! lancement, abandonnés à sa fin.

mod limiter;
mod retry;
mod types;

pub use types::{BatchReport, BatchStats, ValidationRecord};

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::catchall::CatchallDetector;
use crate::config::{Egress, EngineConfig};
use crate::disposable::DisposableRegistry;
use crate::error::{EngineError, ProbeError};
use crate::mx::{DnsResolver, LookupMx, MxCache, ResolutionError};
use crate::score::{Signals, aggregate};
use crate::smtp_verify::{
    DirectTransport, MailboxProber, ProbeOutcome, SmtpProber, Socks5Transport, Transport,
};
use crate::validator::parse_address;

use limiter::RunState;
use retry::Throttled;

pub struct Engine {
    config: EngineConfig,
    mx: MxCache,
    catchall: CatchallDetector,
    registry: DisposableRegistry,
    transport: Arc<dyn Transport>,
}

/// Un lot en cours : sondes soumises aux plafonds du lot et à son jeton.
struct Batch<'e> {
    engine: &'e Engine,
    prober: Throttled<SmtpProber>,
    cancel: CancelToken,
}

impl Engine {
    /// Moteur réel : résolveur DNS système et transport choisi par `egress`.
    pub fn new(config: EngineConfig, registry: DisposableRegistry) -> Result<Self, EngineError> {
        config.validate()?;
        let resolver = Arc::new(DnsResolver::from_system_conf(config.dns.timeout)?);
        let transport: Arc<dyn Transport> = match config.egress {
            Egress::Direct => Arc::new(DirectTransport::new()?),
            Egress::Socks5 { proxy } => Arc::new(Socks5Transport::new(proxy)?),
        };
        Self::with_parts(config, resolver, transport, registry)
    }

    /// Moteur sur des collaborateurs fournis (DNS et transport).
    pub fn with_parts(
        config: EngineConfig,
        resolver: Arc<dyn LookupMx>,
        transport: Arc<dyn Transport>,
        registry: DisposableRegistry,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let mx = MxCache::new(
            resolver,
            config.cache.mx_ttl,
            config.cache.max_entries,
            config.dns,
            config.probe.max_mx_hosts,
        );
        let catchall = CatchallDetector::new(config.cache.catchall_ttl, config.cache.max_entries);
        Ok(Self {
            config,
            mx,
            catchall,
            registry,
            transport,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn batch(&self, cancel: &CancelToken) -> Batch<'_> {
        let limits = Arc::new(RunState::new(
            self.config.global_connection_limit,
            self.config.per_domain_limit,
            self.config.min_domain_spacing,
        ));
        let smtp = SmtpProber::new(self.transport.clone(), self.config.probe.clone(), cancel.clone());
        Batch {
            engine: self,
            prober: Throttled::new(smtp, limits, self.config.retry, cancel.clone()),
            cancel: cancel.clone(),
        }
    }

    /// Chaîne complète pour une adresse. Ne renvoie jamais d'erreur :
    /// l'incertitude est portée par le score et le champ `error`.
    pub async fn validate(&self, raw: &str) -> ValidationRecord {
        self.batch(&CancelToken::new()).validate(raw).await
    }

    /// Valide le lot ; les enregistrements sont rendus dans l'ordre d'entrée.
    pub async fn validate_all<I, S>(&self, addresses: I) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validate_each(addresses, &CancelToken::new(), |_| {}).await
    }

    /// Comme [`validate_all`](Self::validate_all), interruptible par `cancel` :
    /// plus aucune adresse n'est lancée, les sondes ouvertes terminent par
    /// `QUIT`, les enregistrements achevés sont rendus.
    pub async fn validate_until<I, S>(&self, addresses: I, cancel: &CancelToken) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validate_each(addresses, cancel, |_| {}).await
    }

    /// Comme [`validate_until`](Self::validate_until), en remettant chaque
    /// enregistrement à `sink` dès qu'il est prêt (ordre d'achèvement).
    pub async fn validate_each<I, S, F>(
        &self,
        addresses: I,
        cancel: &CancelToken,
        mut sink: F,
    ) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&ValidationRecord),
    {
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
        let total = addresses.len();
        info!(total, workers = self.config.workers, "batch started");

        let batch = self.batch(cancel);
        let batch = &batch;
        let mut completed = stream::iter(addresses.iter().enumerate())
            .take_while(|_| futures::future::ready(!batch.cancel.is_cancelled()))
            .map(|(index, address)| async move { (index, batch.validate(address).await) })
            .buffer_unordered(self.config.workers);

        let mut indexed = Vec::with_capacity(total);
        while let Some((index, record)) = completed.next().await {
            sink(&record);
            indexed.push((index, record));
        }
        indexed.sort_by_key(|(index, _)| *index);

        let report = BatchReport {
            records: indexed.into_iter().map(|(_, record)| record).collect(),
            interrupted: cancel.is_cancelled(),
        };
        let stats = report.stats();
        info!(
            total,
            completed = stats.total,
            valid_syntax = stats.valid_syntax,
            has_mx = stats.has_mx,
            deliverable = stats.deliverable,
            avg_quality_score = stats.avg_quality_score,
            interrupted = report.interrupted,
            "batch finished"
        );
        report
    }

    /// Variante bloquante de [`validate`](Self::validate), sur un runtime
    /// dédié. Ne pas appeler depuis un contexte asynchrone.
    pub fn validate_blocking(&self, raw: &str) -> Result<ValidationRecord, EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| EngineError::Runtime { source })?;
        Ok(runtime.block_on(self.validate(raw)))
    }
}

impl Batch<'_> {
    async fn validate(&self, raw: &str) -> ValidationRecord {
        let engine = self.engine;
        let started = Instant::now();
        let email = raw.trim().to_string();

        let address = match parse_address(&email, engine.config.validation_mode) {
            Ok(address) => address,
            Err(fault) => {
                debug!(email = %email, %fault, "syntax rejected");
                return finish(email, Signals::default(), None, Some(fault.into()), started);
            }
        };
        let domain = address.domain();
        let mut signals = Signals {
            syntax_valid: true,
            is_disposable: engine.registry.contains(domain),
            ..Signals::default()
        };

        let record = match engine.mx.resolve(domain).await {
            Ok(record) if record.has_mx() => record,
            Ok(_) => {
                let err = ProbeError::Resolution(ResolutionError::DomainNotFound);
                return finish(email, signals, None, Some(err), started);
            }
            Err(err) => return finish(email, signals, None, Some(err.into()), started),
        };
        signals.has_mx = true;

        let probe = self
            .prober
            .probe(domain, &record.hosts, address.local())
            .await;
        signals.smtp = Some(probe.outcome);
        signals.is_catchall = if probe.outcome == ProbeOutcome::Accepted {
            engine
                .catchall
                .check(domain, &record.hosts, &self.prober, &self.cancel)
                .await
                .is_catchall
        } else {
            engine
                .catchall
                .cached(domain)
                .await
                .is_some_and(|known| known.is_catchall)
        };
        finish(email, signals, Some(probe.outcome), probe.error(), started)
    }
}

fn finish(
    email: String,
    signals: Signals,
    smtp_outcome: Option<ProbeOutcome>,
    error: Option<ProbeError>,
    started: Instant,
) -> ValidationRecord {
    let assessment = aggregate(&signals);
    let record = ValidationRecord {
        email,
        is_syntax_valid: signals.syntax_valid,
        has_mx: signals.has_mx,
        is_deliverable: smtp_outcome == Some(ProbeOutcome::Accepted),
        is_catchall: signals.is_catchall,
        is_disposable: signals.is_disposable,
        quality_score: assessment.quality_score,
        verdict: assessment.verdict,
        smtp_outcome,
        validation_time: started.elapsed(),
        last_checked: Utc::now(),
        error: error.map(|err| err.to_string()),
    };
    debug!(
        email = %record.email,
        verdict = %record.verdict,
        score = record.quality_score,
        elapsed = ?record.validation_time,
        "address validated"
    );
    record
}
