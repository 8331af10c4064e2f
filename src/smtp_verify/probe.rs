use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace};

use super::error::SessionError;
use super::options::ProbeOptions;
use super::session::SmtpSession;
use super::transport::Transport;
use super::types::{MailboxProbe, ProbeOutcome, ProbeResult, ProbeStage, SmtpEvent, SmtpReply};
use crate::cancel::CancelToken;
use crate::mx::MxHost;

/// Exécute le parcours hôtes × ports pour une boîte.
#[async_trait]
pub trait MailboxProber: Send + Sync {
    async fn probe(&self, domain: &str, hosts: &[MxHost], local: &str) -> MailboxProbe;
}

/// Transition de l'automate après une réponse du serveur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Next(ProbeStage),
    Finish(ProbeOutcome),
}

pub(crate) fn classify_greeting(reply: &SmtpReply) -> Transition {
    if reply.is_positive_completion() {
        Transition::Next(ProbeStage::Hello)
    } else {
        Transition::Finish(ProbeOutcome::Rejected)
    }
}

pub(crate) fn classify_mail_from(reply: &SmtpReply) -> Transition {
    if reply.is_positive_completion() {
        Transition::Next(ProbeStage::RcptTo)
    } else {
        Transition::Finish(ProbeOutcome::Rejected)
    }
}

pub(crate) fn classify_rcpt(reply: &SmtpReply) -> Transition {
    let outcome = match reply.code {
        200..=299 => ProbeOutcome::Accepted,
        550 | 551 | 553 => ProbeOutcome::Rejected,
        _ => ProbeOutcome::Ambiguous,
    };
    Transition::Finish(outcome)
}

/// Le serveur répond à HELO/EHLO : tolérant sur le code, on continue
/// toujours vers `MAIL FROM` sauf si STARTTLS doit être négocié.
pub(crate) fn classify_hello(reply: &SmtpReply, want_tls: bool) -> Transition {
    if want_tls && reply.is_positive_completion() && reply.has_capability("STARTTLS") {
        Transition::Next(ProbeStage::StartTls)
    } else {
        Transition::Next(ProbeStage::MailFrom)
    }
}

struct Ending {
    outcome: ProbeOutcome,
    stage: ProbeStage,
    code: Option<u16>,
    detail: Option<String>,
}

impl Ending {
    fn from_error(stage: ProbeStage, code: Option<u16>, err: &SessionError) -> Self {
        Self {
            outcome: err.outcome(),
            stage,
            code,
            detail: Some(err.to_string()),
        }
    }
}

/// Sonde SMTP réelle : une conversation par couple (hôte, port), à travers
/// le [`Transport`] configuré.
pub struct SmtpProber {
    transport: Arc<dyn Transport>,
    options: ProbeOptions,
    cancel: CancelToken,
}

impl SmtpProber {
    pub fn new(transport: Arc<dyn Transport>, options: ProbeOptions, cancel: CancelToken) -> Self {
        Self {
            transport,
            options,
            cancel,
        }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Une tentative complète ; `QUIT` est envoyé sur toutes les branches
    /// où une connexion a été ouverte.
    pub async fn attempt(&self, host: &str, port: u16, mailbox: &str) -> ProbeResult {
        let started = Instant::now();
        let connect = timeout(self.options.connect_timeout, self.transport.connect(host, port)).await;
        let stream = match connect {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return connect_failure(host, port, ProbeOutcome::ConnectionError, started, err.to_string());
            }
            Err(_) => {
                return connect_failure(host, port, ProbeOutcome::Timeout, started, "connect timed out".to_string());
            }
        };

        let mut session = SmtpSession::new(host, stream, self.options.read_timeout);
        let ending = self.converse(&mut session, port, mailbox).await;
        session.close().await;

        let result = ProbeResult {
            host: host.to_string(),
            port,
            outcome: ending.outcome,
            stage: ending.stage,
            latency: started.elapsed(),
            code: ending.code,
            detail: ending.detail,
            events: std::mem::take(&mut session.events),
        };
        debug!(
            host,
            port,
            outcome = %result.outcome,
            stage = %result.stage,
            code = ?result.code,
            latency = ?result.latency,
            "SMTP attempt finished"
        );
        for event in &result.events {
            trace!(host, port, ?event, "transcript");
        }
        result
    }

    async fn converse(&self, session: &mut SmtpSession, port: u16, mailbox: &str) -> Ending {
        let mut stage = ProbeStage::Greet;
        let mut code = None;
        let mut secured = false;
        loop {
            if self.cancel.is_cancelled() {
                return Ending {
                    outcome: ProbeOutcome::Ambiguous,
                    stage,
                    code,
                    detail: Some("cancelled".to_string()),
                };
            }
            let step = match stage {
                ProbeStage::Greet => session
                    .read_reply(stage)
                    .await
                    .map(|reply| (classify_greeting(&reply), reply.code)),
                ProbeStage::Hello => self.hello(session, port, secured).await,
                ProbeStage::StartTls => match self.starttls(session).await {
                    Ok(Some(reply_code)) => {
                        secured = true;
                        Ok((Transition::Next(ProbeStage::Hello), reply_code))
                    }
                    Ok(None) => {
                        return Ending {
                            outcome: ProbeOutcome::ConnectionError,
                            stage,
                            code,
                            detail: Some("STARTTLS refused".to_string()),
                        };
                    }
                    Err(err) => Err(err),
                },
                ProbeStage::MailFrom => {
                    let command = format!("MAIL FROM:<{}>", self.options.envelope_sender());
                    session
                        .command(stage, &command)
                        .await
                        .map(|reply| (classify_mail_from(&reply), reply.code))
                }
                ProbeStage::RcptTo => session
                    .command(stage, &format!("RCPT TO:<{mailbox}>"))
                    .await
                    .map(|reply| (classify_rcpt(&reply), reply.code)),
                ProbeStage::Connect | ProbeStage::Close => {
                    return Ending {
                        outcome: ProbeOutcome::Ambiguous,
                        stage,
                        code,
                        detail: None,
                    };
                }
            };
            match step {
                Ok((Transition::Next(next), reply_code)) => {
                    code = Some(reply_code);
                    stage = next;
                }
                Ok((Transition::Finish(outcome), reply_code)) => {
                    return Ending {
                        outcome,
                        stage,
                        code: Some(reply_code),
                        detail: None,
                    };
                }
                Err(err) => return Ending::from_error(stage, code, &err),
            }
        }
    }

    async fn hello(
        &self,
        session: &mut SmtpSession,
        port: u16,
        secured: bool,
    ) -> Result<(Transition, u16), SessionError> {
        let helo = self.options.helo_name();
        let mut reply = session.command(ProbeStage::Hello, &format!("EHLO {helo}")).await?;
        if reply.is_permanent_failure() {
            reply = session.command(ProbeStage::Hello, &format!("HELO {helo}")).await?;
        }
        let want_tls = !secured && self.options.wants_starttls(port);
        Ok((classify_hello(&reply, want_tls), reply.code))
    }

    /// `Ok(None)` si le serveur refuse STARTTLS.
    async fn starttls(&self, session: &mut SmtpSession) -> Result<Option<u16>, SessionError> {
        let reply = session.command(ProbeStage::StartTls, "STARTTLS").await?;
        if !reply.is_positive_completion() {
            return Ok(None);
        }
        session.upgrade(self.transport.as_ref()).await?;
        Ok(Some(reply.code))
    }
}

fn connect_failure(
    host: &str,
    port: u16,
    outcome: ProbeOutcome,
    started: Instant,
    message: String,
) -> ProbeResult {
    debug!(host, port, %outcome, error = %message, "SMTP connect failed");
    ProbeResult {
        host: host.to_string(),
        port,
        outcome,
        stage: ProbeStage::Connect,
        latency: started.elapsed(),
        code: None,
        detail: Some(message.clone()),
        events: vec![SmtpEvent::Error {
            stage: ProbeStage::Connect,
            message,
        }],
    }
}

#[async_trait]
impl MailboxProber for SmtpProber {
    /// Hôtes par préférence, ports dans l'ordre configuré. Arrêt au premier
    /// résultat concluant ; une réponse ambiguë fait passer à l'hôte suivant,
    /// un échec réseau au port suivant.
    async fn probe(&self, domain: &str, hosts: &[MxHost], local: &str) -> MailboxProbe {
        let mailbox = format!("{local}@{domain}");
        let mut results = Vec::new();
        'hosts: for host in hosts {
            for &port in &self.options.ports {
                if self.cancel.is_cancelled() {
                    break 'hosts;
                }
                let result = self.attempt(&host.exchange, port, &mailbox).await;
                let outcome = result.outcome;
                results.push(result);
                if outcome.is_conclusive() {
                    break 'hosts;
                }
                if outcome == ProbeOutcome::Ambiguous {
                    continue 'hosts;
                }
            }
        }
        MailboxProbe::from_results(results)
    }
}
