use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Transport used to reach the TURN server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnTransport {
    /// TURN over UDP.
    #[default]
    Udp,
    /// TURN over TCP.
    Tcp,
    /// TURN over TLS.
    Tls,
}

impl fmt::Display for TurnTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            TurnTransport::Udp => "udp",
            TurnTransport::Tcp => "tcp",
            TurnTransport::Tls => "tls",
        };
        write!(f, "{x}")
    }
}

/// NAT traversal policy of a call.
///
/// ```
/// use callstreams::ice::NatPolicy;
///
/// let policy = NatPolicy::new()
///     .set_ice_enabled(true)
///     .set_stun_server(Some("stun.example.org:3478"));
///
/// assert!(policy.stun_server_activated());
/// assert!(!policy.turn_enabled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct NatPolicy {
    ice_enabled: bool,
    stun_enabled: bool,
    turn_enabled: bool,
    stun_server: Option<String>,
    turn_transport: TurnTransport,
    turn_configuration_endpoint: Option<String>,
}

impl NatPolicy {
    /// Policy with everything off.
    pub fn new() -> Self {
        NatPolicy::default()
    }

    /// Whether the call uses ICE.
    pub fn ice_enabled(&self) -> bool {
        self.ice_enabled
    }

    /// Enable ICE.
    pub fn set_ice_enabled(mut self, enabled: bool) -> Self {
        self.ice_enabled = enabled;
        self
    }

    /// Whether TURN relay candidates are gathered.
    pub fn turn_enabled(&self) -> bool {
        self.turn_enabled
    }

    /// Enable TURN. The STUN server doubles as the TURN server.
    pub fn set_turn_enabled(mut self, enabled: bool) -> Self {
        self.turn_enabled = enabled;
        self
    }

    /// Transport to the TURN server.
    pub fn turn_transport(&self) -> TurnTransport {
        self.turn_transport
    }

    /// Set the transport to the TURN server.
    pub fn set_turn_transport(mut self, t: TurnTransport) -> Self {
        self.turn_transport = t;
        self
    }

    /// The STUN (and TURN) server, `host[:port]`.
    pub fn stun_server(&self) -> Option<&str> {
        self.stun_server.as_deref()
    }

    /// Set the STUN server. Setting one enables STUN.
    pub fn set_stun_server(mut self, server: Option<&str>) -> Self {
        self.stun_server = server.map(|s| s.to_string());
        self.stun_enabled = self.stun_server.is_some();
        self
    }

    /// Endpoint where TURN credentials are refreshed before gathering.
    pub fn turn_configuration_endpoint(&self) -> Option<&str> {
        self.turn_configuration_endpoint.as_deref()
    }

    /// Set the TURN configuration endpoint.
    pub fn set_turn_configuration_endpoint(mut self, url: Option<&str>) -> Self {
        self.turn_configuration_endpoint = url.map(|s| s.to_string());
        self
    }

    /// Whether a STUN server is configured and to be used.
    pub fn stun_server_activated(&self) -> bool {
        (self.stun_enabled || self.turn_enabled)
            && self.stun_server.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Host part of the STUN server, used as TURN common name.
    pub fn stun_server_host(&self) -> Option<&str> {
        self.stun_server.as_deref().map(server_host)
    }
}

fn server_host(server: &str) -> &str {
    if let Some(rest) = server.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match server.rsplit_once(':') {
        // more than one colon is a bare IPv6 address
        Some((host, _)) if !host.contains(':') => host,
        _ => server,
    }
}

const NAT64_PREFIX: [u16; 6] = [0x64, 0xff9b, 0, 0, 0, 0];

fn is_nat64(ip: &Ipv6Addr) -> bool {
    ip.segments()[..6] == NAT64_PREFIX
}

/// Choose the address to contact the STUN server with.
///
/// A NAT64 address (`64:ff9b::/96`) is preferred, then IPv4 (including
/// v4-mapped IPv6), then any IPv6.
pub fn preferred_stun_server_addr(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    let nat64 = addrs.iter().find(|a| match a.ip() {
        IpAddr::V6(v6) => is_nat64(&v6),
        IpAddr::V4(_) => false,
    });
    let v4 = || {
        addrs.iter().find(|a| match a.ip() {
            IpAddr::V4(_) => true,
            IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some(),
        })
    };
    let v6 = || addrs.iter().find(|a| a.is_ipv6());

    nat64.or_else(v4).or_else(v6).copied()
}
