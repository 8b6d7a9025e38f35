//! Self-identification within the cluster node list.
//!
//! Matching is exact string comparison against what the operating system
//! reported at startup. There is no DNS alias or subnet resolution, so
//! configuration must use addresses that literally match. Host names are
//! compared case-insensitively.

/// Names and addresses that refer to this process's host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity {
    host_name: String,
    addresses: Vec<String>,
}

impl HostIdentity {
    /// Identity from an explicit host name and address list.
    pub fn new(host_name: impl Into<String>, addresses: impl IntoIterator<Item = String>) -> Self {
        let mut identity =
            Self { host_name: host_name.into().to_ascii_lowercase(), addresses: Vec::new() };
        for address in addresses {
            identity.add_address(address);
        }
        identity
    }

    /// Identity that only answers to loopback names.
    pub fn loopback() -> Self {
        Self::new("localhost", ["127.0.0.1".to_owned(), "localhost".to_owned()])
    }

    /// Add an address; duplicates and empty strings are ignored.
    pub fn add_address(&mut self, address: impl Into<String>) {
        let address = address.into();
        if !address.is_empty() && !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
    }

    /// Whether `name` is this host's name
    pub fn match_host_name(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.host_name)
    }

    /// Whether `address` is one of this host's addresses
    pub fn match_address(&self, address: &str) -> bool {
        self.addresses.iter().any(|own| own == address)
    }

    /// Lower-cased host name
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Known addresses in discovery order
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_name_is_case_insensitive() {
        let identity = HostIdentity::new("Render-01", Vec::new());
        assert_eq!(identity.host_name(), "render-01");
        assert!(identity.match_host_name("RENDER-01"));
        assert!(!identity.match_host_name("render-02"));
    }

    #[test]
    fn address_match_is_exact() {
        let identity = HostIdentity::new("node", ["10.0.0.1".to_owned()]);
        assert!(identity.match_address("10.0.0.1"));
        assert!(!identity.match_address("10.0.0.10"));
        assert!(!identity.match_address("010.0.0.1"));
    }

    #[test]
    fn add_address_deduplicates() {
        let mut identity = HostIdentity::loopback();
        identity.add_address("127.0.0.1");
        identity.add_address("");
        identity.add_address("10.1.1.1");
        assert_eq!(identity.addresses(), ["127.0.0.1", "localhost", "10.1.1.1"]);
    }
}
