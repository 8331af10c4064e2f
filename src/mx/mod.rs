//! Résolution des échangeurs de courrier d'un domaine.
//!
//! [`MxCache::resolve`] interroge d'abord le cache puis, en cas d'absence ou
//! d'expiration, le [`LookupMx`] fourni (par défaut [`DnsResolver`]).

mod cache;
mod error;
mod resolver;
mod types;

pub use cache::MxCache;
pub use error::ResolutionError;
pub use resolver::{DnsResolver, LookupMx, MxAnswer};
pub use types::{MxHost, MxRecord};
