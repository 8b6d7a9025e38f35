//! Host identity detection.
//!
//! Gathers the names and addresses this process answers to, which the
//! manager matches against the cluster configuration.

use std::{
    env, fs, io,
    net::{IpAddr, ToSocketAddrs},
};

use framelock_core::HostIdentity;

use crate::NetError;

/// Detect this host's name and addresses.
///
/// The identity contains the lower-cased host name, the IPv4 addresses it
/// resolves to, the primary local IP, `127.0.0.1` and `localhost`.
///
/// # Errors
/// `HostInfo` when no host name can be determined at all.
pub fn detect() -> Result<HostIdentity, NetError> {
    let host_name = read_host_name().ok_or_else(|| {
        NetError::HostInfo(io::Error::new(io::ErrorKind::NotFound, "host name unavailable"))
    })?;

    let mut identity = HostIdentity::new(host_name.as_str(), Vec::new());
    identity.add_address(identity.host_name().to_owned());

    match (host_name.as_str(), 0).to_socket_addrs() {
        Ok(resolved) => {
            for address in resolved {
                if let IpAddr::V4(ip) = address.ip() {
                    identity.add_address(ip.to_string());
                }
            }
        },
        Err(e) => tracing::debug!(host = %host_name, error = %e, "host name does not resolve"),
    }

    if let Some(ip) = local_ipaddress::get() {
        identity.add_address(ip);
    }

    identity.add_address("127.0.0.1");
    identity.add_address("localhost");

    tracing::debug!(
        host = identity.host_name(),
        addresses = ?identity.addresses(),
        "detected host identity"
    );
    Ok(identity)
}

fn read_host_name() -> Option<String> {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| env::var("HOSTNAME").ok())
        .or_else(|| env::var("COMPUTERNAME").ok())
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_always_matches() {
        let Ok(identity) = detect() else {
            return;
        };
        assert!(identity.match_address("127.0.0.1"));
        assert!(identity.match_address("localhost"));
        assert!(identity.match_host_name(identity.host_name()));
    }
}
