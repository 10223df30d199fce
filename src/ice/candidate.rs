use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

use combine::error::StreamError;
use combine::parser::char::{spaces, string};
use combine::stream::StreamErrorFor;
use combine::{attempt, choice, many1, optional, satisfy, token, ParseError, Parser, Stream};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::IceError;

/// Component id of RTP in a check list.
pub const COMPONENT_RTP: u16 = 1;
/// Component id of RTCP in a check list.
pub const COMPONENT_RTCP: u16 = 2;

/// Transport protocol of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// UDP
    Udp,
    /// TCP
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

impl TryFrom<&str> for Protocol {
    type Error = ();

    fn try_from(v: &str) -> Result<Self, Self::Error> {
        match v.to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(()),
        }
    }
}

/// ICE candidates are network addresses used to connect to a peer.
///
/// Local candidates are gathered per stream and per component (RTP and, without
/// rtcp-mux, RTCP). Remote candidates come from the remote description.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// Groups similar candidates in the freezing algorithm.
    ///
    /// Same for two candidates that have the same type, base IP address,
    /// protocol and STUN/TURN server. Communicated for remote candidates,
    /// calculated for local ones.
    foundation: Option<String>,

    /// 1 for RTP, 2 for RTCP.
    component_id: u16,

    proto: Protocol,

    /// Communicated for remote candidates, calculated for local ones.
    prio: Option<u32>,

    /// The address to send to or receive on.
    addr: SocketAddr,

    /// Address an agent sends from for this candidate.
    ///
    /// * host - same as `addr`
    /// * server reflexive - the local interface address
    /// * relay - same as `addr`
    base: Option<SocketAddr>,

    kind: CandidateKind,

    /// Related address (raddr/rport).
    raddr: Option<SocketAddr>,

    /// Ties a trickled candidate to an ICE generation.
    ufrag: Option<String>,
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candidate({}={}/{} c{}",
            self.kind, self.addr, self.proto, self.component_id
        )?;
        if let Some(base) = self.base {
            if base != self.addr {
                write!(f, " base={base}")?;
            }
        }
        if let Some(raddr) = self.raddr {
            write!(f, " raddr={raddr}")?;
        }
        write!(f, " prio={}", self.prio())?;
        write!(f, ")")
    }
}

impl Candidate {
    #[allow(clippy::too_many_arguments)]
    fn new(
        foundation: Option<String>,
        component_id: u16,
        proto: Protocol,
        prio: Option<u32>,
        addr: SocketAddr,
        base: Option<SocketAddr>,
        kind: CandidateKind,
        raddr: Option<SocketAddr>,
        ufrag: Option<String>,
    ) -> Self {
        Candidate {
            foundation,
            component_id,
            proto,
            prio,
            addr,
            base,
            kind,
            raddr,
            ufrag,
        }
    }

    /// Creates a host candidate for a component.
    ///
    /// Host candidates are local sockets directly on the host.
    pub fn host(addr: SocketAddr, component_id: u16) -> Result<Self, IceError> {
        check_component(component_id)?;
        if !is_valid_ip(addr.ip()) {
            return Err(IceError::BadCandidate(format!("invalid ip {}", addr.ip())));
        }

        Ok(Candidate::new(
            None,
            component_id,
            Protocol::Udp,
            None,
            addr,
            Some(addr),
            CandidateKind::Host,
            None,
            None,
        ))
    }

    /// Creates a server reflexive candidate.
    ///
    /// `addr` is the mapped address discovered through STUN, `base` the local
    /// interface the binding request was sent from.
    pub fn server_reflexive(
        addr: SocketAddr,
        base: SocketAddr,
        component_id: u16,
    ) -> Result<Self, IceError> {
        check_component(component_id)?;
        if !is_valid_ip(addr.ip()) {
            return Err(IceError::BadCandidate(format!("invalid ip {}", addr.ip())));
        }
        if addr.is_ipv4() != base.is_ipv4() {
            return Err(IceError::BadCandidate(
                "addr and base are different IP versions".to_owned(),
            ));
        }

        Ok(Candidate::new(
            None,
            component_id,
            Protocol::Udp,
            None,
            addr,
            Some(base),
            CandidateKind::ServerReflexive,
            Some(base),
            None,
        ))
    }

    /// Creates a relayed candidate.
    ///
    /// `addr` is the allocation on the TURN server, `mapped` the address the
    /// TURN server saw us coming from.
    pub fn relayed(addr: SocketAddr, mapped: SocketAddr, component_id: u16) -> Result<Self, IceError> {
        check_component(component_id)?;
        if !is_valid_ip(addr.ip()) {
            return Err(IceError::BadCandidate(format!("invalid ip {}", addr.ip())));
        }

        Ok(Candidate::new(
            None,
            component_id,
            Protocol::Udp,
            None,
            addr,
            Some(addr),
            CandidateKind::Relayed,
            Some(mapped),
            None,
        ))
    }

    /// Parses a candidate from the attribute value, with or without `a=`.
    ///
    /// ```
    /// use callstreams::ice::{Candidate, CandidateKind};
    ///
    /// let c = Candidate::from_sdp_string(
    ///     "candidate:1 1 udp 1845494015 198.51.100.100 11100 typ srflx raddr 203.0.113.100 rport 10100",
    /// ).unwrap();
    ///
    /// assert_eq!(c.kind(), CandidateKind::ServerReflexive);
    /// assert_eq!(c.component_id(), 1);
    /// ```
    pub fn from_sdp_string(s: &str) -> Result<Self, IceError> {
        let s = s.trim();
        let s = s.strip_prefix("a=").unwrap_or(s);
        candidate()
            .parse(s)
            .map(|(c, _)| c)
            .map_err(|e| IceError::BadCandidate(format!("{}: {}", s, e)))
    }

    /// Candidate foundation.
    ///
    /// For local candidates this is calculated.
    pub fn foundation(&self) -> String {
        if let Some(v) = &self.foundation {
            return v.clone();
        }

        // Two candidates have the same foundation when all of the
        // following are true:
        let mut hasher = DefaultHasher::new();

        //  o  They have the same type (host, relayed, server reflexive, or peer
        //     reflexive).
        self.kind.hash(&mut hasher);

        //  o  Their bases have the same IP address (the ports can be different).
        self.base().ip().hash(&mut hasher);

        //  o  For reflexive and relayed candidates, the STUN or TURN servers
        //     used to obtain them have the same IP address.
        if let Some(raddr) = self.raddr {
            raddr.ip().hash(&mut hasher);
        }

        //  o  They were obtained using the same transport protocol (TCP, UDP).
        self.proto.hash(&mut hasher);

        format!("{:x}", hasher.finish() as u32)
    }

    /// Freeze the calculated foundation.
    pub(crate) fn compute_foundation(&mut self) {
        if self.foundation.is_none() {
            self.foundation = Some(self.foundation());
        }
    }

    /// The priority of the candidate (RFC 8445, Section 5.1.2).
    pub fn prio(&self) -> u32 {
        // Remote candidates have their prio calculated on their side.
        if let Some(prio) = self.prio {
            return prio;
        }

        // RECOMMENDED type preferences: 126 for host, 110 for peer-reflexive,
        // 100 for server-reflexive and 0 for relayed candidates.
        let type_preference = match self.kind {
            CandidateKind::Host => 126,
            CandidateKind::PeerReflexive => 110,
            CandidateKind::ServerReflexive => 100,
            CandidateKind::Relayed => 0,
        };

        // priority = (2^24)*(type preference) +
        //     (2^8)*(local preference) +
        //     (2^0)*(256 - component ID)
        type_preference << 24 | self.local_preference() << 8 | (256 - self.component_id as u32)
    }

    fn local_preference(&self) -> u32 {
        if self.addr.is_ipv6() {
            65_535
        } else {
            65_534
        }
    }

    /// 1 for RTP, 2 for RTCP.
    pub fn component_id(&self) -> u16 {
        self.component_id
    }

    /// Address of the candidate.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transport protocol.
    pub fn proto(&self) -> Protocol {
        self.proto
    }

    /// Local base address.
    pub fn base(&self) -> SocketAddr {
        self.base.unwrap_or(self.addr)
    }

    /// Related address, if any.
    pub fn raddr(&self) -> Option<SocketAddr> {
        self.raddr
    }

    /// The kind of candidate.
    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    /// The ufrag of a trickled remote candidate.
    pub fn ufrag(&self) -> Option<&str> {
        self.ufrag.as_deref()
    }

    /// Generates a candidate attribute string.
    pub fn to_sdp_string(&self) -> String {
        let mut s = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation(),
            self.component_id,
            self.proto,
            self.prio(),
            self.addr.ip(),
            self.addr.port(),
            self.kind
        );
        if let Some(raddr) = &self.raddr {
            s.push_str(&format!(" raddr {} rport {}", raddr.ip(), raddr.port()))
        }
        if let Some(ufrag) = &self.ufrag {
            s.push_str(&format!(" ufrag {}", ufrag));
        }
        s
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sdp_string())
    }
}

fn check_component(component_id: u16) -> Result<(), IceError> {
    if component_id == COMPONENT_RTP || component_id == COMPONENT_RTCP {
        Ok(())
    } else {
        Err(IceError::BadCandidate(format!(
            "invalid component id {component_id}"
        )))
    }
}

/// Type of candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateKind {
    /// Host (local network interface)
    Host,
    /// Prflx (Peer reflexive)
    PeerReflexive,
    /// Srflx (STUN)
    ServerReflexive,
    /// Relay (TURN)
    Relayed,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            CandidateKind::Host => "host",
            CandidateKind::PeerReflexive => "prflx",
            CandidateKind::ServerReflexive => "srflx",
            CandidateKind::Relayed => "relay",
        };
        write!(f, "{x}")
    }
}

fn is_valid_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v) => {
            !v.is_link_local() && !v.is_broadcast() && !v.is_multicast() && !v.is_unspecified()
        }
        IpAddr::V6(v) => !v.is_multicast() && !v.is_unspecified(),
    }
}

/// Non space token.
fn not_sp<Input>() -> impl Parser<Input, Output = String>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    many1(satisfy(|c| c != ' ' && c != '\r' && c != '\n'))
}

/// Parser for candidate, without attribute prefix (a=).
fn candidate<Input>() -> impl Parser<Input, Output = Candidate>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    let port = || {
        not_sp::<Input>().and_then(|s| {
            s.parse::<u16>()
                .map_err(StreamErrorFor::<Input>::message_format)
        })
    };

    let ip_addr = || {
        not_sp().and_then(|s| {
            s.parse::<IpAddr>()
                .map_err(StreamErrorFor::<Input>::message_format)
        })
    };

    let kind = choice((
        string("host").map(|_| CandidateKind::Host),
        string("prflx").map(|_| CandidateKind::PeerReflexive),
        string("srflx").map(|_| CandidateKind::ServerReflexive),
        string("relay").map(|_| CandidateKind::Relayed),
    ));

    (
        string("candidate:"),
        not_sp(),
        token(' '),
        not_sp().and_then(|s| {
            s.parse::<u16>()
                .map_err(StreamErrorFor::<Input>::message_format)
        }),
        token(' '),
        not_sp().and_then(|s| {
            Protocol::try_from(s.as_str()).map_err(|_| {
                StreamErrorFor::<Input>::message_format(format!("invalid protocol: {}", s))
            })
        }),
        token(' '),
        not_sp().and_then(|s| {
            s.parse::<u32>()
                .map_err(StreamErrorFor::<Input>::message_format)
        }),
        token(' '),
        ip_addr(),
        token(' '),
        port(),
        string(" typ "),
        kind,
        optional((
            attempt(string(" raddr ")),
            ip_addr(),
            string(" rport "),
            port(),
        )),
        optional((attempt(string(" generation ")), not_sp())),
        optional((attempt(string(" ufrag ")), not_sp())),
        spaces(),
    )
        .map(
            |(
                _,
                found,
                _,
                comp_id,
                _,
                proto,
                _,
                prio,
                _,
                addr,
                _,
                port,
                _,
                kind,
                raddr, // (" raddr ", addr, " rport ", port)
                _,     // (" generation ", generation)
                ufrag, // (" ufrag ", ufrag)
                _,
            )| {
                Candidate::new(
                    Some(found),
                    comp_id,
                    proto,
                    Some(prio),
                    SocketAddr::from((addr, port)),
                    None,
                    kind,
                    raddr.map(|(_, addr, _, port)| SocketAddr::from((addr, port))),
                    ufrag.map(|(_, u)| u),
                )
            },
        )
}

/// Serialize [Candidate] into candidate info.
///
/// e.g. serde_json would produce:
/// ```json
/// {
///  "candidate": "candidate:12044049 1 udp 2130706175 1.2.3.4 1234 typ host",
///  "usernameFragment": null
/// }
/// ```
impl Serialize for Candidate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut o = serializer.serialize_struct("CandidateInfo", 2)?;
        o.serialize_field("candidate", &self.to_sdp_string())?;
        o.serialize_field("usernameFragment", &self.ufrag())?;
        o.end()
    }
}

/// Deserialize [Candidate] from a candidate info.
impl<'de> Deserialize<'de> for Candidate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CandidateInfo {
            candidate: String,
            username_fragment: Option<String>,
        }

        let info = CandidateInfo::deserialize(deserializer)?;
        let mut c = Candidate::from_sdp_string(&info.candidate).map_err(serde::de::Error::custom)?;
        if c.ufrag.is_none() {
            c.ufrag = info.username_fragment;
        }
        Ok(c)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_host_and_relay() {
        let c = Candidate::from_sdp_string("a=candidate:1 2 udp 2113929470 203.0.113.100 10101 typ host")
            .unwrap();
        assert_eq!(c.component_id(), COMPONENT_RTCP);
        assert_eq!(c.kind(), CandidateKind::Host);
        assert_eq!(c.addr(), "203.0.113.100:10101".parse().unwrap());
        assert_eq!(c.prio(), 2113929470);

        let c = Candidate::from_sdp_string(
            "candidate:1 1 udp 255 192.0.2.100 12100 typ relay raddr 198.51.100.100 rport 11100 generation 0 ufrag abc",
        )
        .unwrap();
        assert_eq!(c.kind(), CandidateKind::Relayed);
        assert_eq!(c.raddr(), Some("198.51.100.100:11100".parse().unwrap()));
        assert_eq!(c.ufrag(), Some("abc"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Candidate::from_sdp_string("candidate:1 1 sctp 1 1.2.3.4 5 typ host").is_err());
        assert!(Candidate::from_sdp_string("nonsense").is_err());
    }

    #[test]
    fn host_prio_order() {
        let rtp = Candidate::host("192.168.0.2:7078".parse().unwrap(), COMPONENT_RTP).unwrap();
        let rtcp = Candidate::host("192.168.0.2:7079".parse().unwrap(), COMPONENT_RTCP).unwrap();
        let srflx = Candidate::server_reflexive(
            "1.2.3.4:7078".parse().unwrap(),
            "192.168.0.2:7078".parse().unwrap(),
            COMPONENT_RTP,
        )
        .unwrap();
        assert!(rtp.prio() > rtcp.prio());
        assert!(rtp.prio() > srflx.prio());
        assert!(rtp.prio() < 2_u32.pow(31));
        assert_ne!(rtp.foundation(), srflx.foundation());
        // same type and base ip means same foundation, regardless of component
        assert_eq!(rtp.foundation(), rtcp.foundation());
    }

    #[test]
    fn invalid_component() {
        assert!(Candidate::host("192.168.0.2:7078".parse().unwrap(), 3).is_err());
        assert!(Candidate::host("0.0.0.0:7078".parse().unwrap(), 1).is_err());
    }

    #[test]
    fn candidate_info_json() {
        let c = Candidate::from_sdp_string("candidate:1 1 udp 2113929471 203.0.113.100 10100 typ host")
            .unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(
            json,
            r#"{"candidate":"candidate:1 1 udp 2113929471 203.0.113.100 10100 typ host","usernameFragment":null}"#
        );
        let back: Candidate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
