use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use mailprobe::{EngineConfig, Egress, ProbeOptions, RetryPolicy, ValidationMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Human,
    Json,
    Ndjson,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Strict,
    Relaxed,
}

#[derive(Debug, Parser)]
#[command(name = "mailprobe-cli", version, about = "Vérifie la délivrabilité d'adresses e-mail sans envoyer de message")]
pub struct Cli {
    /// adresses à vérifier
    pub emails: Vec<String>,

    /// fichier d'adresses (une par ligne)
    #[arg(long, short = 'i', env = "MAILPROBE_INPUT")]
    pub input: Option<PathBuf>,

    /// lit des adresses depuis stdin (une par ligne)
    #[arg(long)]
    pub stdin: bool,

    /// liste de domaines jetables (un par ligne, `#` pour commenter)
    #[arg(long, env = "MAILPROBE_DISPOSABLE")]
    pub disposable: Option<PathBuf>,

    /// format de sortie
    #[arg(long, value_enum, default_value = "human", env = "MAILPROBE_FORMAT")]
    pub format: Format,

    /// écrit le rapport dans un fichier ; csv et ndjson y sont écrits au fil
    /// de l'eau, les autres formats en une fois (écriture atomique)
    #[arg(long, short = 'o', env = "MAILPROBE_OUT")]
    pub out: Option<PathBuf>,

    /// reprend un rapport csv/ndjson existant : adresses déjà présentes
    /// ignorées, nouveaux résultats ajoutés à la fin
    #[arg(long, requires = "out")]
    pub resume: bool,

    /// vidage du rapport sur disque toutes les N adresses
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub flush_every: u64,

    /// met à jour valid_domains.txt, catchall_domains.txt,
    /// not_catchall_domains.txt et verified_emails.txt dans ce répertoire
    #[arg(long, value_name = "DIR", env = "MAILPROBE_DOMAIN_LISTS")]
    pub domain_lists: Option<PathBuf>,

    /// grammaire de la partie locale
    #[arg(long, value_enum, default_value = "strict")]
    pub mode: Mode,

    /// adresses traitées en parallèle
    #[arg(long, default_value_t = 5, env = "MAILPROBE_WORKERS")]
    pub workers: usize,

    /// sondes simultanées par domaine
    #[arg(long, default_value_t = 1, env = "MAILPROBE_PER_DOMAIN")]
    pub per_domain: usize,

    /// connexions SMTP simultanées, tous domaines confondus
    #[arg(long, default_value_t = 32, env = "MAILPROBE_MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// écart minimal entre deux sondes d'un même domaine (ms)
    #[arg(long = "spacing", default_value_t = 1_000, env = "MAILPROBE_SPACING_MS")]
    pub spacing_ms: u64,

    /// timeout de connexion (ms)
    #[arg(long = "connect-timeout", default_value_t = 10_000, env = "MAILPROBE_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// timeout de lecture d'une réponse SMTP (ms)
    #[arg(long = "read-timeout", default_value_t = 10_000, env = "MAILPROBE_READ_TIMEOUT_MS")]
    pub read_timeout_ms: u64,

    /// ports essayés, dans l'ordre
    #[arg(long, value_delimiter = ',', default_value = "25,587,465", env = "MAILPROBE_PORTS")]
    pub ports: Vec<u16>,

    /// nouvelles tentatives après un échec réseau
    #[arg(long, default_value_t = 2, env = "MAILPROBE_RETRIES")]
    pub retries: u32,

    /// attente initiale entre tentatives (ms), doublée à chaque fois
    #[arg(long = "backoff-base", default_value_t = 2_000, env = "MAILPROBE_BACKOFF_BASE_MS")]
    pub backoff_base_ms: u64,

    /// plafond de l'attente entre tentatives (ms)
    #[arg(long = "backoff-cap", default_value_t = 30_000, env = "MAILPROBE_BACKOFF_CAP_MS")]
    pub backoff_cap_ms: u64,

    /// durée de vie du cache MX (s)
    #[arg(long = "mx-ttl", default_value_t = 21_600, env = "MAILPROBE_MX_TTL")]
    pub mx_ttl_secs: u64,

    /// durée de vie du cache catch-all (s)
    #[arg(long = "catchall-ttl", default_value_t = 21_600, env = "MAILPROBE_CATCHALL_TTL")]
    pub catchall_ttl_secs: u64,

    /// nom utilisé pour EHLO/HELO
    #[arg(long, default_value = "localhost", env = "MAILPROBE_HELO")]
    pub helo: String,

    /// enveloppe MAIL FROM (par défaut verify@<helo>)
    #[arg(long = "from", env = "MAILPROBE_MAIL_FROM")]
    pub mail_from: Option<String>,

    /// passe par un proxy SOCKS5 (hôte:port)
    #[arg(long, env = "MAILPROBE_SOCKS5")]
    pub socks5: Option<SocketAddr>,

    /// -v : debug, -vv : trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// journaux au format JSON (stderr)
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn clap_command() -> clap::Command {
        <Self as clap::CommandFactory>::command()
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            workers: self.workers,
            per_domain_limit: self.per_domain,
            global_connection_limit: self.max_connections,
            min_domain_spacing: Duration::from_millis(self.spacing_ms),
            validation_mode: match self.mode {
                Mode::Strict => ValidationMode::Strict,
                Mode::Relaxed => ValidationMode::Relaxed,
            },
            probe: ProbeOptions {
                helo_name: self.helo.clone(),
                mail_from: self.mail_from.clone(),
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                read_timeout: Duration::from_millis(self.read_timeout_ms),
                ports: self.ports.clone(),
                ..ProbeOptions::default()
            },
            retry: RetryPolicy {
                retries: self.retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_cap_ms),
            },
            cache: mailprobe::CacheConfig {
                mx_ttl: Duration::from_secs(self.mx_ttl_secs),
                catchall_ttl: Duration::from_secs(self.catchall_ttl_secs),
                ..defaults.cache
            },
            egress: self
                .socks5
                .map_or(Egress::Direct, |proxy| Egress::Socks5 { proxy }),
            ..defaults
        }
    }
}
