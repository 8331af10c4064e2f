use super::SyntaxFault;

pub(crate) const MAX_DOMAIN_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

/// Convertit le domaine en ASCII (IDNA, minuscules) puis valide ses labels.
/// Il faut au moins deux labels et un TLD alphabétique (ou punycode `xn--`).
pub(crate) fn normalize_domain(domain: &str) -> Result<String, SyntaxFault> {
    if domain.is_empty() {
        return Err(SyntaxFault::InvalidDomainLabel);
    }
    let ascii = idna::domain_to_ascii(domain).map_err(|_| SyntaxFault::InvalidDomainLabel)?;
    if ascii.len() > MAX_DOMAIN_LEN {
        return Err(SyntaxFault::TooLong);
    }

    let labels: Vec<&str> = ascii.split('.').collect();
    if labels.len() < 2 {
        return Err(SyntaxFault::InvalidDomainLabel);
    }
    for label in &labels {
        check_label(label)?;
    }

    let tld = labels[labels.len() - 1];
    let tld_ok = tld.starts_with("xn--")
        || (tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));
    if !tld_ok {
        return Err(SyntaxFault::InvalidDomainLabel);
    }

    Ok(ascii.to_ascii_lowercase())
}

fn check_label(label: &str) -> Result<(), SyntaxFault> {
    if label.is_empty()
        || label.len() > MAX_LABEL_LEN
        || label.starts_with('-')
        || label.ends_with('-')
        || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(SyntaxFault::InvalidDomainLabel);
    }
    Ok(())
}
