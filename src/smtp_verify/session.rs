use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::trace;

use super::error::SessionError;
use super::transport::{BoxedStream, Transport};
use super::types::{ProbeStage, SmtpEvent, SmtpReply};

const QUIT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_REPLY_LINES: usize = 100;
const MAX_LINE_BYTES: u64 = 4096;

enum StreamState {
    Open(BufReader<BoxedStream>),
    Closed,
}

/// Conversation SMTP sur un flux déjà ouvert. Chaque lecture/écriture est
/// bornée par `read_timeout` ; tout échange est consigné dans `events`.
pub(crate) struct SmtpSession {
    host: String,
    state: StreamState,
    read_timeout: Duration,
    pub(crate) events: Vec<SmtpEvent>,
}

impl SmtpSession {
    pub(crate) fn new(host: &str, stream: BoxedStream, read_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            state: StreamState::Open(BufReader::new(stream)),
            read_timeout,
            events: Vec::new(),
        }
    }

    pub(crate) async fn read_reply(&mut self, stage: ProbeStage) -> Result<SmtpReply, SessionError> {
        let deadline = self.read_timeout;
        let result = match &mut self.state {
            StreamState::Open(reader) => timeout(deadline, read_reply_from(reader, stage))
                .await
                .unwrap_or(Err(SessionError::Timeout { stage })),
            StreamState::Closed => Err(SessionError::Closed),
        };
        match &result {
            Ok(reply) => {
                trace!(host = %self.host, %stage, code = reply.code, "S");
                self.events.push(SmtpEvent::Received {
                    stage,
                    reply: reply.clone(),
                });
            }
            Err(err) => self.record_error(stage, err),
        }
        result
    }

    pub(crate) async fn command(
        &mut self,
        stage: ProbeStage,
        command: &str,
    ) -> Result<SmtpReply, SessionError> {
        trace!(host = %self.host, %stage, command, "C");
        self.events.push(SmtpEvent::Sent {
            stage,
            command: command.to_string(),
        });
        let deadline = self.read_timeout;
        let sent = match &mut self.state {
            StreamState::Open(reader) => {
                let line = format!("{command}\r\n");
                let write = async {
                    let stream = reader.get_mut();
                    stream.write_all(line.as_bytes()).await?;
                    stream.flush().await
                };
                match timeout(deadline, write).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(source)) => Err(SessionError::Io { stage, source }),
                    Err(_) => Err(SessionError::Timeout { stage }),
                }
            }
            StreamState::Closed => Err(SessionError::Closed),
        };
        if let Err(err) = sent {
            self.record_error(stage, &err);
            return Err(err);
        }
        self.read_reply(stage).await
    }

    /// Remplace le flux par sa version TLS. Les octets éventuellement
    /// tamponnés avant la poignée de main sont abandonnés.
    pub(crate) async fn upgrade(&mut self, transport: &dyn Transport) -> Result<(), SessionError> {
        let state = std::mem::replace(&mut self.state, StreamState::Closed);
        let reader = match state {
            StreamState::Open(reader) => reader,
            StreamState::Closed => return Err(SessionError::Closed),
        };
        match transport.secure(&self.host, reader.into_inner()).await {
            Ok(stream) => {
                self.state = StreamState::Open(BufReader::new(stream));
                Ok(())
            }
            Err(source) => {
                let err = SessionError::Upgrade { source };
                self.record_error(ProbeStage::StartTls, &err);
                Err(err)
            }
        }
    }

    /// `QUIT` de courtoisie puis libération du flux, quel que soit l'état
    /// de la conversation. Les erreurs sont seulement consignées.
    pub(crate) async fn close(&mut self) {
        let StreamState::Open(reader) = &mut self.state else {
            return;
        };
        self.events.push(SmtpEvent::Sent {
            stage: ProbeStage::Close,
            command: "QUIT".to_string(),
        });
        let quit = async {
            let stream = reader.get_mut();
            stream.write_all(b"QUIT\r\n").await?;
            stream.flush().await?;
            let reply = read_reply_from(reader, ProbeStage::Close).await;
            let _ = reader.get_mut().shutdown().await;
            Ok::<_, std::io::Error>(reply)
        };
        match timeout(QUIT_TIMEOUT, quit).await {
            Ok(Ok(Ok(reply))) => self.events.push(SmtpEvent::Received {
                stage: ProbeStage::Close,
                reply,
            }),
            Ok(Ok(Err(err))) => self.record_error(ProbeStage::Close, &err),
            Ok(Err(source)) => self.record_error(
                ProbeStage::Close,
                &SessionError::Io {
                    stage: ProbeStage::Close,
                    source,
                },
            ),
            Err(_) => self.record_error(
                ProbeStage::Close,
                &SessionError::Timeout {
                    stage: ProbeStage::Close,
                },
            ),
        }
        self.state = StreamState::Closed;
    }

    fn record_error(&mut self, stage: ProbeStage, err: &SessionError) {
        trace!(host = %self.host, %stage, error = %err, "session error");
        self.events.push(SmtpEvent::Error {
            stage,
            message: err.to_string(),
        });
    }
}

async fn read_reply_from(
    reader: &mut BufReader<BoxedStream>,
    stage: ProbeStage,
) -> Result<SmtpReply, SessionError> {
    let mut code = None;
    let mut lines = Vec::new();
    loop {
        let mut raw = Vec::new();
        let read = (&mut *reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut raw)
            .await
            .map_err(|source| SessionError::Io { stage, source })?;
        if read == 0 {
            return Err(SessionError::Io {
                stage,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed while reading reply",
                ),
            });
        }
        if !raw.ends_with(b"\n") && read as u64 >= MAX_LINE_BYTES {
            return Err(SessionError::Protocol {
                stage,
                message: format!("reply line longer than {MAX_LINE_BYTES} bytes"),
            });
        }
        // bannières Latin-1 fréquentes : le code reste lisible
        let raw = String::from_utf8_lossy(&raw);
        let line = raw.trim_end_matches(['\r', '\n']);
        let (parsed, continuation, text) = parse_reply_line(line).ok_or_else(|| {
            SessionError::Protocol {
                stage,
                message: format!("invalid reply line: '{line}'"),
            }
        })?;
        match code {
            Some(existing) if existing != parsed => {
                return Err(SessionError::Protocol {
                    stage,
                    message: format!("inconsistent reply codes: {existing} vs {parsed}"),
                });
            }
            _ => code = Some(parsed),
        }
        lines.push(text.to_string());
        if !continuation {
            break;
        }
        if lines.len() >= MAX_REPLY_LINES {
            return Err(SessionError::Protocol {
                stage,
                message: "reply too long".to_string(),
            });
        }
    }
    Ok(SmtpReply {
        code: code.unwrap_or_default(),
        lines,
    })
}

/// `250-texte` → (250, suite attendue, "texte").
pub(crate) fn parse_reply_line(line: &str) -> Option<(u16, bool, &str)> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = digits.parse::<u16>().ok()?;
    let continuation = match line.as_bytes().get(3) {
        None | Some(b' ') => false,
        Some(b'-') => true,
        Some(_) => return None,
    };
    let text = line.get(4..).unwrap_or("");
    Some((code, continuation, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_continuation_lines() {
        assert_eq!(parse_reply_line("250 ok"), Some((250, false, "ok")));
        assert_eq!(parse_reply_line("250-STARTTLS"), Some((250, true, "STARTTLS")));
        assert_eq!(parse_reply_line("220"), Some((220, false, "")));
        assert_eq!(parse_reply_line("2x0 nope"), None);
        assert_eq!(parse_reply_line("250_bad"), None);
        assert_eq!(parse_reply_line("25"), None);
    }

    #[tokio::test]
    async fn reads_multiline_reply() {
        let (client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(b"250-mx.example.com\r\n250-SIZE 1000\r\n250 STARTTLS\r\n")
            .await
            .unwrap();
        let mut session = SmtpSession::new("mx", Box::new(client), Duration::from_secs(1));
        let reply = session.read_reply(ProbeStage::Hello).await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines.len(), 3);
        assert!(reply.has_capability("starttls"));
    }

    #[tokio::test]
    async fn non_utf8_banner_keeps_its_code() {
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"220 mx.test ESMTP pr\xeat\r\n").await.unwrap();
        let mut session = SmtpSession::new("mx", Box::new(client), Duration::from_secs(1));
        let reply = session.read_reply(ProbeStage::Greet).await.unwrap();
        assert_eq!(reply.code, 220);
        assert!(reply.lines[0].starts_with("mx.test ESMTP pr"));
    }

    #[tokio::test]
    async fn endless_line_is_cut_short() {
        let (client, mut server) = tokio::io::duplex(16 * 1024);
        let peer = tokio::spawn(async move {
            server.write_all(b"220 ").await.unwrap();
            server.write_all(&[b'a'; 8192]).await.unwrap();
            server
        });
        let mut session = SmtpSession::new("mx", Box::new(client), Duration::from_secs(5));
        let err = session.read_reply(ProbeStage::Greet).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol { stage: ProbeStage::Greet, .. }));
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn mismatched_codes_are_a_protocol_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"250-one\r\n251 two\r\n").await.unwrap();
        let mut session = SmtpSession::new("mx", Box::new(client), Duration::from_secs(1));
        let err = session.read_reply(ProbeStage::Hello).await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut session = SmtpSession::new("mx", Box::new(client), Duration::from_secs(5));
        let err = session.read_reply(ProbeStage::Greet).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { stage: ProbeStage::Greet }));
        assert!(matches!(session.events.last(), Some(SmtpEvent::Error { .. })));
    }

    #[tokio::test]
    async fn close_sends_quit_and_is_idempotent() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut session = SmtpSession::new("mx", Box::new(client), Duration::from_secs(1));
        let peer = tokio::spawn(async move {
            let mut buf = vec![0u8; 6];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(b"221 bye\r\n").await.unwrap();
            buf
        });
        session.close().await;
        session.close().await;
        assert_eq!(peer.await.unwrap(), b"QUIT\r\n");
        assert!(matches!(
            session.command(ProbeStage::Hello, "EHLO x").await,
            Err(SessionError::Closed)
        ));
    }
}
