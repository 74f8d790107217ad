//! Type-safe network primitives shared by every layer of the stack.
//!
//! Addresses are newtypes over their wire representation (network byte
//! order), so a value can be memcpy'd into a header without a
//! conversion step.  Conversion to and from host-order integers is
//! explicit.  [`NetError`] is the crate-wide error taxonomy.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// =============================================================================
// Ipv4Addr
// =============================================================================

/// IPv4 address stored in **network byte order** (`[u8; 4]`).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    /// `0.0.0.0` — the unspecified / wildcard address.
    pub const ANY: Self = Self([0, 0, 0, 0]);
    /// `255.255.255.255` — the limited broadcast address.
    pub const BROADCAST: Self = Self([255, 255, 255, 255]);
    /// `127.0.0.1` — the loopback address.
    pub const LOCALHOST: Self = Self([127, 0, 0, 1]);

    /// Construct from a host-order `u32`.
    #[inline]
    pub const fn from_u32(val: u32) -> Self {
        Self(val.to_be_bytes())
    }

    /// Return the address as a host-order `u32`.
    #[inline]
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// `true` if the address is `0.0.0.0`.
    #[inline]
    pub const fn is_any(self) -> bool {
        self.to_u32() == 0
    }

    /// `true` if the address is `255.255.255.255`.
    #[inline]
    pub const fn is_broadcast(self) -> bool {
        self.to_u32() == u32::MAX
    }

    /// `true` if `self` falls within `network`/`netmask`.
    #[inline]
    pub const fn in_subnet(self, network: Ipv4Addr, netmask: Ipv4Addr) -> bool {
        self.to_u32() & netmask.to_u32() == network.to_u32() & netmask.to_u32()
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Ipv4Addr {
    type Err = AddrParseError;

    /// Parse dotted-quad notation (`192.0.2.1`).
    fn from_str(s: &str) -> Result<Self, AddrParseError> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(AddrParseError)?;
            if part.is_empty() || part.len() > 3 {
                return Err(AddrParseError);
            }
            *octet = part.parse().map_err(|_| AddrParseError)?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError);
        }
        Ok(Self(octets))
    }
}

// =============================================================================
// MacAddr
// =============================================================================

/// Ethernet hardware address (6 bytes, network byte order).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// `00:00:00:00:00:00` — the zero / unset address.
    pub const ZERO: Self = Self([0; 6]);
    /// `ff:ff:ff:ff:ff:ff` — the broadcast address.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// `true` if the address is all zeros.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == [0; 6]
    }

    /// `true` if the address is `ff:ff:ff:ff:ff:ff`.
    #[inline]
    pub fn is_broadcast(self) -> bool {
        self.0 == [0xff; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = AddrParseError;

    /// Parse colon-hex sextet notation (`aa:bb:cc:dd:ee:ff`).
    fn from_str(s: &str) -> Result<Self, AddrParseError> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(AddrParseError)?;
            if part.is_empty() || part.len() > 2 {
                return Err(AddrParseError);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| AddrParseError)?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError);
        }
        Ok(Self(octets))
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// A transport endpoint: IPv4 address plus host-order port.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    /// `0.0.0.0:0` — the fully wildcard endpoint.
    pub const ANY: Self = Self::new(Ipv4Addr::ANY, 0);

    #[inline]
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Endpoint {
    type Err = AddrParseError;

    /// Parse `address:port` notation (`192.0.2.2:7`).
    fn from_str(s: &str) -> Result<Self, AddrParseError> {
        let (addr, port) = s.rsplit_once(':').ok_or(AddrParseError)?;
        Ok(Self {
            addr: addr.parse()?,
            port: port.parse().map_err(|_| AddrParseError)?,
        })
    }
}

/// Failure to parse a textual address or endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid address syntax")]
pub struct AddrParseError;

// =============================================================================
// NetError
// =============================================================================

/// Crate-wide error taxonomy.
///
/// Validation and policy failures on the ingress path are logged and
/// the packet is dropped; these variants surface only from operations
/// a caller invoked directly.  [`NetError::Incomplete`] is
/// non-terminal: address resolution was started and the caller may
/// retry.  [`NetError::Interrupted`] is the EINTR-class result of the
/// process-wide cancellation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetError {
    #[error("header too short")]
    TooShort,
    #[error("length field does not match received data")]
    LengthMismatch,
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("malformed or unsupported header")]
    Malformed,
    #[error("fixed-size pool exhausted")]
    PoolExhausted,
    #[error("queue full")]
    QueueFull,
    #[error("device I/O failure")]
    DeviceIo,
    #[error("device is down")]
    NotUp,
    #[error("already registered")]
    AlreadyRegistered,
    #[error("no route to host")]
    NoRoute,
    #[error("datagram exceeds device MTU")]
    MtuExceeded,
    #[error("source address unreachable through the selected interface")]
    SourceUnreachable,
    #[error("source address required")]
    SourceRequired,
    #[error("address resolution in progress")]
    Incomplete,
    #[error("operation not supported")]
    Unsupported,
    #[error("no endpoint with that id")]
    BadHandle,
    #[error("address already in use")]
    AddrInUse,
    #[error("endpoint is not in a valid state for this operation")]
    InvalidState,
    #[error("endpoint closed")]
    Closed,
    #[error("interrupted by cancellation event")]
    Interrupted,
}
