use std::time::Duration;

#[cfg(feature = "with-serde")]
use serde::{Deserialize, Serialize};

/// Réglages d'une sonde SMTP.
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub helo_name: String,
    /// Enveloppe `MAIL FROM` ; par défaut `verify@<helo_name>`.
    pub mail_from: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Ports essayés dans l'ordre pour chaque hôte.
    pub ports: Vec<u16>,
    /// Ports sur lesquels STARTTLS est négocié s'il est annoncé.
    pub starttls_ports: Vec<u16>,
    pub max_mx_hosts: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            helo_name: "localhost".to_string(),
            mail_from: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            ports: vec![25, 587, 465],
            starttls_ports: vec![587],
            max_mx_hosts: 3,
        }
    }
}

impl ProbeOptions {
    pub fn helo_name(&self) -> &str {
        let trimmed = self.helo_name.trim();
        if trimmed.is_empty() { "localhost" } else { trimmed }
    }

    pub fn envelope_sender(&self) -> String {
        self.mail_from
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("verify@{}", self.helo_name()))
    }

    pub(crate) fn wants_starttls(&self, port: u16) -> bool {
        self.starttls_ports.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_defaults_to_helo_name() {
        let options = ProbeOptions {
            helo_name: "probe.example.net".to_string(),
            ..ProbeOptions::default()
        };
        assert_eq!(options.envelope_sender(), "verify@probe.example.net");
    }

    #[test]
    fn blank_values_fall_back() {
        let options = ProbeOptions {
            helo_name: "  ".to_string(),
            mail_from: Some(String::new()),
            ..ProbeOptions::default()
        };
        assert_eq!(options.helo_name(), "localhost");
        assert_eq!(options.envelope_sender(), "verify@localhost");
    }
}
