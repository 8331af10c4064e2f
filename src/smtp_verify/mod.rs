//! Sonde SMTP sans envoi de message.
//!
//! Une tentative suit l'automate `Connect → Greet → Hello → MailFrom →
//! RcptTo → Close` contre un couple (hôte, port) et produit un
//! [`ProbeResult`]. [`SmtpProber`] enchaîne les tentatives sur les hôtes MX
//! et les ports configurés ; le chemin réseau est fourni par un
//! [`Transport`].

mod error;
mod options;
mod probe;
mod session;
mod transport;
mod types;
mod util;

pub use error::TransportError;
pub use options::ProbeOptions;
pub use probe::{MailboxProber, SmtpProber};
pub use transport::{AsyncStream, BoxedStream, DirectTransport, Socks5Transport, Transport};
pub use types::{MailboxProbe, ProbeOutcome, ProbeResult, ProbeStage, SmtpEvent, SmtpReply};
pub use util::{confidence_for, random_local_part};

#[cfg(test)]
pub(crate) mod tests;
