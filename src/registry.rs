//! Static dialect registry and resolver.
//!
//! Each instrument family (scope, PSU, load) declares a fixed table of
//! [`DialectEntry`] records. Resolution against an `*IDN?` string is fully
//! deterministic: one pass over model patterns, then one pass over brand
//! aliases, both in (priority desc, name asc) order, then the generic
//! fallback. Model entries carry a higher priority than brand entries so a
//! model match always wins over its own brand.

use log::{debug, info};
use regex::Regex;

use crate::error::Result;

/// One registered dialect for an instrument family `A` (a dyn trait).
pub struct DialectEntry<A: ?Sized> {
    /// Stable registry name, e.g. `"rigol"` or `"tti-cpx200dp"`.
    pub name: &'static str,
    /// Resolution rank; higher wins within a pass. Model-specific entries
    /// use 2, brand entries 1.
    pub priority: u8,
    /// Case-insensitive regex patterns matched against the uppercased IDN.
    pub model_patterns: &'static [&'static str],
    /// Substrings matched case-insensitively against the IDN.
    pub brand_aliases: &'static [&'static str],
    /// Dialect factory. Fallible so token tables can be validated here.
    pub make: fn() -> Result<Box<A>>,
}

/// Outcome of a registry resolution.
pub struct Resolved<A: ?Sized> {
    /// Name of the matched entry, or the fallback name.
    pub name: &'static str,
    /// The constructed dialect.
    pub dialect: Box<A>,
}

fn ordered<'a, A: ?Sized>(entries: &'a [DialectEntry<A>]) -> Vec<&'a DialectEntry<A>> {
    let mut order: Vec<&DialectEntry<A>> = entries.iter().collect();
    order.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(b.name)));
    order
}

/// Resolve `idn` against `entries`. Model patterns are tried across the whole
/// table before any brand alias, so a model entry of one brand beats a brand
/// entry of another regardless of table order. Unresolvable IDNs fall back to
/// `fallback` under `fallback_name`.
pub fn resolve<A: ?Sized>(
    entries: &[DialectEntry<A>],
    idn: &str,
    fallback_name: &'static str,
    fallback: fn() -> Result<Box<A>>,
) -> Result<Resolved<A>> {
    let upper = idn.to_uppercase();
    let order = ordered(entries);

    for entry in &order {
        for pat in entry.model_patterns {
            let hit = Regex::new(pat).map(|re| re.is_match(&upper)).unwrap_or(false);
            if hit {
                info!("dialect {} matched model pattern {pat:?}", entry.name);
                return Ok(Resolved {
                    name: entry.name,
                    dialect: (entry.make)()?,
                });
            }
        }
    }

    for entry in &order {
        for alias in entry.brand_aliases {
            if upper.contains(&alias.to_uppercase()) {
                info!("dialect {} matched brand alias {alias:?}", entry.name);
                return Ok(Resolved {
                    name: entry.name,
                    dialect: (entry.make)()?,
                });
            }
        }
    }

    debug!("no dialect matched {idn:?}, using {fallback_name}");
    Ok(Resolved {
        name: fallback_name,
        dialect: fallback()?,
    })
}
