use std::net::IpAddr;

/// Reported when no usable interface address is found
pub const UNKNOWN_ADDRESS: &str = "Unknown";

/// First non-loopback IPv4 address of this host, excluding link-local (169.254.x.x).
///
/// Best effort: interface enumeration failures yield `None`.
pub fn local_address() -> Option<IpAddr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::debug!(error = %e, "failed to enumerate network interfaces");
            return None;
        }
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.ip() {
            IpAddr::V4(ipv4) if !ipv4.is_loopback() && !ipv4.is_link_local() => {
                Some(IpAddr::V4(ipv4))
            }
            _ => None,
        })
}

/// Display form of [`local_address`], `"Unknown"` when unresolved
pub(crate) fn describe_local_address() -> String {
    local_address()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_address_is_routable() {
        if let Some(IpAddr::V4(ip)) = local_address() {
            assert!(!ip.is_loopback());
            assert!(!ip.is_link_local());
        }
    }

    #[test]
    fn test_description_never_empty() {
        assert!(!describe_local_address().is_empty());
    }
}
