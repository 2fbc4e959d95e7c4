//! Hostname and URL derivation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\*\.)?(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])$",
    )
    .unwrap()
});

/// RFC-1123 hostname, optionally with a leading `*.` wildcard label.
#[must_use]
pub fn is_valid_hostname(name: &str) -> bool {
    name.len() <= 253 && HOSTNAME.is_match(name)
}

/// Project names must be plain hostnames, no wildcard.
#[must_use]
pub fn is_valid_project_name(name: &str) -> bool {
    !name.starts_with("*.") && is_valid_hostname(name)
}

/// Inputs that fully determine a project's hostnames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnameSpec<'a> {
    pub name: &'a str,
    pub tld: &'a str,
    pub additional_hostnames: &'a [String],
    pub additional_fqdns: &'a [String],
    pub router_disabled: bool,
}

impl HostnameSpec<'_> {
    #[must_use]
    pub fn primary(&self) -> String {
        format!("{}.{}", self.name, self.tld).to_lowercase()
    }

    /// Ordered hostnames: primary first, then the rest sorted.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        if self.router_disabled {
            return Vec::new();
        }
        self.all_hostnames()
    }

    /// Same as [`Self::hostnames`] but ignoring whether the router is disabled.
    #[must_use]
    pub fn all_hostnames(&self) -> Vec<String> {
        let primary = self.primary();
        let mut rest: BTreeSet<String> = self
            .additional_hostnames
            .iter()
            .filter(|h| !h.trim().is_empty())
            .map(|h| format!("{}.{}", h.trim(), self.tld).to_lowercase())
            .chain(
                self.additional_fqdns
                    .iter()
                    .filter(|h| !h.trim().is_empty())
                    .map(|h| h.trim().to_lowercase()),
            )
            .collect();
        rest.remove(&primary);

        let mut out = Vec::with_capacity(rest.len() + 1);
        out.push(primary);
        out.extend(rest);
        out
    }
}

/// `scheme://host[:port]`, leaving out the port when it is the scheme default.
#[must_use]
pub fn url_for(https: bool, host: &str, port: u16) -> String {
    let (scheme, default) = if https { ("https", 443) } else { ("http", 80) };
    if port == default {
        format!("{scheme}://{host}")
    } else {
        format!("{scheme}://{host}:{port}")
    }
}
