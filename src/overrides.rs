//! Hostname overrides.
//!
//! Built once from `host=ip[,ip...]` specs at startup and read-only
//! afterwards, so it can be shared between query tasks without locking.

use std::net::{IpAddr, Ipv4Addr};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Map of fully-qualified hostname (trailing dot) to the addresses
/// answered for it, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: FxHashMap<String, Vec<Ipv4Addr>>,
}

impl OverrideTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from a list of specs, failing on the first bad one.
    pub fn from_specs<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for spec in specs {
            table.add_spec(spec.as_ref())?;
        }
        Ok(table)
    }

    /// Adds a spec like `foo.example.com=1.2.3.4,5.6.7.8`.
    ///
    /// Addresses are appended to any already configured for the same host.
    /// Nothing is added if any address in the spec is invalid.
    pub fn add_spec(&mut self, spec: &str) -> Result<()> {
        let (host, ips_csv) = spec
            .split_once('=')
            .ok_or_else(|| Error::InvalidSpec(spec.to_string()))?;

        if host.is_empty() {
            return Err(Error::EmptyHost(spec.to_string()));
        }

        let ips = ips_csv
            .split(',')
            .map(parse_override_ip)
            .collect::<Result<Vec<_>>>()?;

        self.entries.entry(fqdn(host)).or_default().extend(ips);
        Ok(())
    }

    /// Looks up the exact fully-qualified name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Ipv4Addr]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Number of overridden hostnames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no host is overridden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Appends the trailing dot if missing.
#[must_use]
pub fn fqdn(host: &str) -> String {
    if host.ends_with('.') {
        host.to_string()
    } else {
        format!("{host}.")
    }
}

fn parse_override_ip(s: &str) -> Result<Ipv4Addr> {
    match s.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Ok(ip),
        Ok(IpAddr::V6(ip)) => ip
            .to_ipv4_mapped()
            .ok_or_else(|| Error::Ipv6Override(s.to_string())),
        Err(_) => Err(Error::InvalidIp(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_address() {
        let table = OverrideTable::from_specs(["example.com=1.2.3.4"]).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("example.com."),
            Some(&[Ipv4Addr::new(1, 2, 3, 4)][..])
        );
    }

    #[test]
    fn keeps_existing_trailing_dot() {
        let table = OverrideTable::from_specs(["example.com.=1.2.3.4"]).unwrap();

        assert!(table.get("example.com.").is_some());
        assert!(table.get("example.com..").is_none());
    }

    #[test]
    fn repeated_host_appends_in_order() {
        let table =
            OverrideTable::from_specs(["a.test=1.1.1.1,2.2.2.2", "a.test.=3.3.3.3"]).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("a.test.").unwrap(),
            &[
                Ipv4Addr::new(1, 1, 1, 1),
                Ipv4Addr::new(2, 2, 2, 2),
                Ipv4Addr::new(3, 3, 3, 3)
            ]
        );
    }

    #[test]
    fn lookup_is_exact() {
        let table = OverrideTable::from_specs(["example.com=1.2.3.4"]).unwrap();

        assert!(table.get("www.example.com.").is_none());
        assert!(table.get("EXAMPLE.COM.").is_none());
        assert!(table.get("example.com").is_none());
    }

    #[test]
    fn missing_equals_is_rejected() {
        let err = OverrideTable::from_specs(["example.com"]).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(s) if s == "example.com"));
    }

    #[test]
    fn splits_on_first_equals_only() {
        let err = OverrideTable::from_specs(["a.test=1.2.3.4=5"]).unwrap_err();
        assert!(matches!(err, Error::InvalidIp(s) if s == "1.2.3.4=5"));
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(matches!(
            OverrideTable::from_specs(["a.test=1.2.3.4,nope"]),
            Err(Error::InvalidIp(s)) if s == "nope"
        ));
        assert!(matches!(
            OverrideTable::from_specs(["a.test="]),
            Err(Error::InvalidIp(s)) if s.is_empty()
        ));
    }

    #[test]
    fn empty_host_is_rejected() {
        assert!(matches!(
            OverrideTable::from_specs(["=1.2.3.4"]),
            Err(Error::EmptyHost(_))
        ));
    }

    #[test]
    fn ipv6_is_rejected_but_mapped_ipv4_is_accepted() {
        assert!(matches!(
            OverrideTable::from_specs(["a.test=::1"]),
            Err(Error::Ipv6Override(_))
        ));

        let table = OverrideTable::from_specs(["a.test=::ffff:10.0.0.1"]).unwrap();
        assert_eq!(table.get("a.test.").unwrap(), &[Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[test]
    fn failed_spec_adds_nothing() {
        let mut table = OverrideTable::new();
        assert!(table.add_spec("a.test=1.1.1.1,bad").is_err());
        assert!(table.is_empty());
    }
}
