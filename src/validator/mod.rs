//! Contrôle syntaxique des adresses (sans aucune E/S).
//!
//! [`parse_address`] applique la grammaire `local@domaine` avec les limites de
//! longueur RFC 5321 (partie locale ≤ 64 octets, domaine ≤ 255 octets,
//! adresse ≤ 254 octets) et renvoie l'adresse normalisée ou la première
//! [`SyntaxFault`] rencontrée.

mod domain;
mod local;
mod types;

pub use types::{EmailAddress, SyntaxFault, ValidationMode};

use domain::{MAX_DOMAIN_LEN, normalize_domain};
use local::check_local;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;

pub fn parse_address(raw: &str, mode: ValidationMode) -> Result<EmailAddress, SyntaxFault> {
    let input = raw.trim();

    // le dernier '@' sépare : une quoted-string peut en contenir
    let (local, domain) = input.rsplit_once('@').ok_or(SyntaxFault::MissingAtSign)?;

    if input.len() > MAX_ADDRESS_LEN || local.len() > MAX_LOCAL_LEN || domain.len() > MAX_DOMAIN_LEN
    {
        return Err(SyntaxFault::TooLong);
    }

    check_local(local, mode)?;
    let ascii_domain = normalize_domain(domain)?;
    Ok(EmailAddress::new(local, ascii_domain))
}

pub fn is_valid_syntax(raw: &str) -> bool {
    parse_address(raw, ValidationMode::Strict).is_ok()
}
