use super::{SyntaxFault, ValidationMode};

/// Contrôle la partie locale (déjà bornée en longueur par l'appelant).
pub(crate) fn check_local(local: &str, mode: ValidationMode) -> Result<(), SyntaxFault> {
    if local.is_empty() {
        return Err(SyntaxFault::EmptyLocalPart);
    }
    let ok = match mode {
        ValidationMode::Strict => is_dot_atom(local),
        ValidationMode::Relaxed => is_quoted(local) || is_dot_atom(local),
    };
    if ok {
        Ok(())
    } else {
        Err(SyntaxFault::InvalidLocalPart)
    }
}

/// atext ASCII + '.' non initial/terminal, pas de ".."
fn is_dot_atom(s: &str) -> bool {
    if s.starts_with('.') || s.ends_with('.') || s.contains("..") {
        return false;
    }
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || is_atext_symbol(c))
}

fn is_atext_symbol(c: char) -> bool {
    matches!(
        c,
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_' | '`'
            | '{' | '|' | '}' | '~'
    )
}

/// quoted-string simple : guillemets aux extrémités, pas de guillemet
/// interne non échappé ni de caractère de contrôle.
fn is_quoted(s: &str) -> bool {
    if s.len() < 2 || !s.starts_with('"') || !s.ends_with('"') {
        return false;
    }
    let inner = &s[1..s.len() - 1];
    let mut escaped = false;
    for c in inner.chars() {
        if c.is_ascii_control() || !c.is_ascii() {
            return false;
        }
        match (escaped, c) {
            (true, _) => escaped = false,
            (false, '\\') => escaped = true,
            (false, '"') => return false,
            _ => {}
        }
    }
    !escaped
}
