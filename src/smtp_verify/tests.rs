use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
    WriteHalf,
};

use super::probe::{Transition, classify_greeting, classify_hello, classify_mail_from, classify_rcpt};
use super::*;
use crate::cancel::CancelToken;
use crate::mx::MxHost;

/// Réponses d'un serveur SMTP simulé.
#[derive(Clone, Copy)]
pub(crate) struct Script {
    pub greeting: &'static str,
    pub ehlo: &'static str,
    pub helo: &'static str,
    pub starttls: &'static str,
    pub mail_from: &'static str,
    pub rcpt: fn(&str) -> &'static str,
    /// Attente avant chaque réponse.
    pub delay: Duration,
}

pub(crate) fn accept_all(_mailbox: &str) -> &'static str {
    "250 2.1.5 ok"
}

/// Seules les boîtes `user@…` existent.
pub(crate) fn only_user(mailbox: &str) -> &'static str {
    if mailbox.starts_with("user@") {
        "250 2.1.5 ok"
    } else {
        "550 5.1.1 no such user"
    }
}

impl Script {
    pub(crate) fn catchall() -> Self {
        Self {
            rcpt: accept_all,
            ..Self::default()
        }
    }
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: "220 mx.test ESMTP",
            ehlo: "250-mx.test\r\n250 SIZE 1000000",
            helo: "250 mx.test",
            starttls: "220 ready",
            mail_from: "250 2.1.0 ok",
            rcpt: only_user,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Behaviour {
    Refuse,
    /// `connect` ne se termine jamais.
    Hang,
    /// Connexion acceptée, serveur muet.
    Silent,
    Serve(Script),
}

type PlanFn = dyn Fn(&str, u16) -> Behaviour + Send + Sync;

/// Transport en mémoire : chaque connexion est servie par un script, les
/// connexions ouvertes sont comptées côté client.
pub(crate) struct ScriptedTransport {
    plan: Box<PlanFn>,
    connects: AtomicUsize,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(plan: F) -> Self
    where
        F: Fn(&str, u16) -> Behaviour + Send + Sync + 'static,
    {
        Self {
            plan: Box::new(plan),
            connects: AtomicUsize::new(0),
            open: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn serving(script: Script) -> Self {
        Self::new(move |_, _| Behaviour::Serve(script))
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Plus grand nombre de connexions simultanément ouvertes.
    pub(crate) fn peak_open(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn counted(&self, inner: DuplexStream) -> BoxedStream {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Box::new(CountedStream {
            inner,
            open: self.open.clone(),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match (self.plan)(host, port) {
            Behaviour::Refuse => Err(TransportError::Connect {
                host: host.to_string(),
                port,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            }),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Silent => {
                let (client, server) = tokio::io::duplex(4096);
                tokio::spawn(async move {
                    let _held = server;
                    std::future::pending::<()>().await;
                });
                Ok(self.counted(client))
            }
            Behaviour::Serve(script) => {
                let (client, server) = tokio::io::duplex(4096);
                tokio::spawn(serve(server, script, self.commands.clone()));
                Ok(self.counted(client))
            }
        }
    }

    async fn secure(&self, _host: &str, stream: BoxedStream) -> Result<BoxedStream, TransportError> {
        Ok(stream)
    }
}

struct CountedStream {
    inner: DuplexStream,
    open: Arc<AtomicUsize>,
}

impl Drop for CountedStream {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

async fn serve(stream: DuplexStream, script: Script, log: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    if answer(&mut write, script.greeting, script.delay).await.is_err() {
        return;
    }
    while let Ok(Some(line)) = lines.next_line().await {
        log.lock().unwrap().push(line.clone());
        let upper = line.to_ascii_uppercase();
        let text = if upper.starts_with("EHLO") {
            script.ehlo
        } else if upper.starts_with("HELO") {
            script.helo
        } else if upper.starts_with("STARTTLS") {
            script.starttls
        } else if upper.starts_with("MAIL FROM") {
            script.mail_from
        } else if upper.starts_with("RCPT TO") {
            (script.rcpt)(mailbox_of(&line))
        } else if upper.starts_with("QUIT") {
            let _ = answer(&mut write, "221 bye", Duration::ZERO).await;
            return;
        } else {
            "502 5.5.2 unrecognized"
        };
        if answer(&mut write, text, script.delay).await.is_err() {
            return;
        }
    }
}

async fn answer(
    write: &mut WriteHalf<DuplexStream>,
    text: &str,
    delay: Duration,
) -> std::io::Result<()> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    write.write_all(format!("{text}\r\n").as_bytes()).await
}

fn mailbox_of(line: &str) -> &str {
    line.split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map(|(mailbox, _)| mailbox)
        .unwrap_or("")
}

pub(crate) fn test_options(ports: Vec<u16>) -> ProbeOptions {
    ProbeOptions {
        helo_name: "probe.test".to_string(),
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
        ports,
        ..ProbeOptions::default()
    }
}

fn prober(transport: &Arc<ScriptedTransport>, ports: Vec<u16>) -> SmtpProber {
    SmtpProber::new(transport.clone(), test_options(ports), CancelToken::new())
}

fn hosts(names: &[&str]) -> Vec<MxHost> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| MxHost::new(10 * (i as u16 + 1), name.to_string()))
        .collect()
}

fn reply(code: u16) -> SmtpReply {
    SmtpReply {
        code,
        lines: vec!["text".to_string()],
    }
}

#[test]
fn rcpt_codes_are_classified() {
    assert_eq!(classify_rcpt(&reply(250)), Transition::Finish(ProbeOutcome::Accepted));
    assert_eq!(classify_rcpt(&reply(251)), Transition::Finish(ProbeOutcome::Accepted));
    for code in [550, 551, 553] {
        assert_eq!(classify_rcpt(&reply(code)), Transition::Finish(ProbeOutcome::Rejected));
    }
    for code in [421, 450, 451, 452, 552, 554] {
        assert_eq!(classify_rcpt(&reply(code)), Transition::Finish(ProbeOutcome::Ambiguous));
    }
}

#[test]
fn greeting_and_sender_refusals_are_rejections() {
    assert_eq!(classify_greeting(&reply(220)), Transition::Next(ProbeStage::Hello));
    assert_eq!(classify_greeting(&reply(554)), Transition::Finish(ProbeOutcome::Rejected));
    assert_eq!(classify_mail_from(&reply(250)), Transition::Next(ProbeStage::RcptTo));
    assert_eq!(classify_mail_from(&reply(451)), Transition::Finish(ProbeOutcome::Rejected));
}

#[test]
fn hello_is_lenient() {
    assert_eq!(classify_hello(&reply(502), false), Transition::Next(ProbeStage::MailFrom));
    let tls = SmtpReply {
        code: 250,
        lines: vec!["mx.test".to_string(), "STARTTLS".to_string()],
    };
    assert_eq!(classify_hello(&tls, true), Transition::Next(ProbeStage::StartTls));
    assert_eq!(classify_hello(&tls, false), Transition::Next(ProbeStage::MailFrom));
}

#[tokio::test]
async fn accepted_mailbox_walks_every_stage() {
    let transport = Arc::new(ScriptedTransport::serving(Script::default()));
    let probe = prober(&transport, vec![25, 587])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Accepted);
    assert_eq!(probe.attempts(), 1);
    let result = &probe.results[0];
    assert_eq!((result.port, result.stage, result.code), (25, ProbeStage::RcptTo, Some(250)));
    assert_eq!(
        transport.commands(),
        vec![
            "EHLO probe.test",
            "MAIL FROM:<verify@probe.test>",
            "RCPT TO:<user@example.com>",
            "QUIT",
        ]
    );
    assert_eq!(probe.error(), None);
}

#[tokio::test]
async fn unknown_mailbox_is_terminal() {
    let transport = Arc::new(ScriptedTransport::serving(Script::default()));
    let probe = prober(&transport, vec![25, 587, 465])
        .probe("example.com", &hosts(&["mx1.example.com", "mx2.example.com"]), "ghost")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Rejected);
    assert_eq!(transport.connects(), 1);
    assert_eq!(probe.last_code(), Some(550));
    assert!(matches!(
        probe.error(),
        Some(crate::ProbeError::ProtocolRejection { code: Some(550), .. })
    ));
}

#[tokio::test]
async fn refused_greeting_still_quits() {
    let script = Script {
        greeting: "554 5.7.1 go away",
        ..Script::default()
    };
    let transport = Arc::new(ScriptedTransport::serving(script));
    let probe = prober(&transport, vec![25])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Rejected);
    assert_eq!(probe.results[0].stage, ProbeStage::Greet);
    assert_eq!(transport.commands(), vec!["QUIT"]);
}

#[tokio::test]
async fn refused_sender_is_rejected() {
    let script = Script {
        mail_from: "553 5.7.1 sender refused",
        ..Script::default()
    };
    let transport = Arc::new(ScriptedTransport::serving(script));
    let probe = prober(&transport, vec![25])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Rejected);
    assert_eq!(probe.results[0].stage, ProbeStage::MailFrom);
    assert!(!transport.commands().iter().any(|c| c.starts_with("RCPT")));
}

#[tokio::test]
async fn greylisting_moves_to_next_host() {
    fn greylist(_: &str) -> &'static str {
        "450 4.2.0 greylisted"
    }
    let script = Script {
        rcpt: greylist,
        ..Script::default()
    };
    let transport = Arc::new(ScriptedTransport::serving(script));
    let probe = prober(&transport, vec![25, 587])
        .probe("example.com", &hosts(&["mx1.example.com", "mx2.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Ambiguous);
    let tried: Vec<_> = probe.results.iter().map(|r| (r.host.as_str(), r.port)).collect();
    assert_eq!(tried, vec![("mx1.example.com", 25), ("mx2.example.com", 25)]);
    assert!(!probe.is_transient());
    assert_eq!(probe.error(), None);
}

#[tokio::test]
async fn connection_failure_falls_back_to_next_port() {
    let transport = Arc::new(ScriptedTransport::new(|_, port| match port {
        25 => Behaviour::Refuse,
        _ => Behaviour::Serve(Script::default()),
    }));
    let probe = prober(&transport, vec![25, 587])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Accepted);
    assert_eq!(probe.results[0].outcome, ProbeOutcome::ConnectionError);
    assert_eq!(probe.results[0].stage, ProbeStage::Connect);
    assert_eq!(probe.results[1].port, 587);
}

#[tokio::test]
async fn ehlo_refusal_falls_back_to_helo() {
    let script = Script {
        ehlo: "502 5.5.1 EHLO not implemented",
        ..Script::default()
    };
    let transport = Arc::new(ScriptedTransport::serving(script));
    let probe = prober(&transport, vec![25])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Accepted);
    let commands = transport.commands();
    assert_eq!(&commands[..2], &["EHLO probe.test", "HELO probe.test"]);
}

#[tokio::test]
async fn starttls_is_negotiated_on_submission_port() {
    let script = Script {
        ehlo: "250-mx.test\r\n250 STARTTLS",
        ..Script::default()
    };
    let transport = Arc::new(ScriptedTransport::serving(script));
    let probe = prober(&transport, vec![587])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Accepted);
    assert_eq!(
        transport.commands(),
        vec![
            "EHLO probe.test",
            "STARTTLS",
            "EHLO probe.test",
            "MAIL FROM:<verify@probe.test>",
            "RCPT TO:<user@example.com>",
            "QUIT",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn hanging_connect_times_out() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Behaviour::Hang));
    let probe = prober(&transport, vec![25])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Ambiguous);
    assert_eq!(probe.results[0].outcome, ProbeOutcome::Timeout);
    assert!(probe.is_transient());
    assert!(matches!(probe.error(), Some(crate::ProbeError::ProtocolTimeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_at_greeting() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Behaviour::Silent));
    let probe = prober(&transport, vec![25])
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    let result = &probe.results[0];
    assert_eq!((result.outcome, result.stage), (ProbeOutcome::Timeout, ProbeStage::Greet));
    assert_eq!(transport.peak_open(), 1);
    assert!(probe.is_transient());
}

#[tokio::test]
async fn cancelled_prober_opens_nothing() {
    let transport = Arc::new(ScriptedTransport::serving(Script::default()));
    let cancel = CancelToken::new();
    cancel.cancel();
    let prober = SmtpProber::new(transport.clone(), test_options(vec![25]), cancel);
    let probe = prober
        .probe("example.com", &hosts(&["mx.example.com"]), "user")
        .await;

    assert_eq!(probe.outcome, ProbeOutcome::Ambiguous);
    assert_eq!(probe.attempts(), 0);
    assert_eq!(transport.connects(), 0);
    assert!(!probe.is_transient());
}
