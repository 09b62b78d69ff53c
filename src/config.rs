//! Process-wide server configuration.
//!
//! Built once at startup and never mutated afterwards. Every field has a
//! default, so `Config::default()` is a working development setup and a
//! partial JSON document deserialises cleanly:
//!
//! ```rust
//! let cfg: arbol::Config = serde_json::from_str(r#"{"port": 8080, "trust_proxy": 1}"#).unwrap();
//! assert_eq!(cfg.port, 8080);
//! ```

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Deserialize;

use crate::error::Error;

/// Ten mebibytes, the body limit for JSON and form payloads.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 3000;

/// Interface the listener binds to. Only the two values the server
/// historically accepted are representable.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum Host {
    #[default]
    #[serde(rename = "0.0.0.0")]
    AllInterfaces,
    #[serde(rename = "localhost")]
    Localhost,
}

impl Host {
    pub fn ip(self) -> IpAddr {
        match self {
            Self::AllInterfaces => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Localhost     => IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl std::str::FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0.0.0.0"   => Ok(Self::AllInterfaces),
            "localhost" => Ok(Self::Localhost),
            other       => Err(Error::Config(format!("host must be \"0.0.0.0\" or \"localhost\", got {other:?}"))),
        }
    }
}

/// How much of `X-Forwarded-For` to believe when computing the client ip.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum TrustProxy {
    /// `true` trusts every hop (left-most address wins); `false` ignores the header.
    All(bool),
    /// Trust this many hops counted from the socket peer.
    Hops(u32),
}

impl Default for TrustProxy {
    fn default() -> Self { Self::All(false) }
}

impl std::str::FromStr for TrustProxy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true"  => Ok(Self::All(true)),
            "false" => Ok(Self::All(false)),
            n => n
                .parse()
                .map(Self::Hops)
                .map_err(|_| Error::Config(format!("trust_proxy must be a boolean or hop count, got {n:?}"))),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: Host,
    pub port: u16,
    pub trust_proxy: TrustProxy,
    pub production: bool,
    pub body_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Host::default(),
            port: DEFAULT_PORT,
            trust_proxy: TrustProxy::default(),
            production: production_from_env(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl Config {
    /// Defaults overlaid with `ARBOL_HOST`, `ARBOL_PORT`, `ARBOL_TRUST_PROXY`,
    /// `ARBOL_ENV` and `ARBOL_BODY_LIMIT`.
    pub fn from_env() -> Result<Self, Error> {
        let mut cfg = Self::default();
        if let Ok(host) = env::var("ARBOL_HOST") {
            cfg.host = host.parse()?;
        }
        if let Ok(port) = env::var("ARBOL_PORT") {
            cfg.port = port
                .parse()
                .map_err(|_| Error::Config(format!("ARBOL_PORT is not a port number: {port:?}")))?;
        }
        if let Ok(trust) = env::var("ARBOL_TRUST_PROXY") {
            cfg.trust_proxy = trust.parse()?;
        }
        if let Ok(limit) = env::var("ARBOL_BODY_LIMIT") {
            cfg.body_limit = limit
                .parse()
                .map_err(|_| Error::Config(format!("ARBOL_BODY_LIMIT is not a byte count: {limit:?}")))?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.body_limit == 0 {
            return Err(Error::Config("body_limit must be greater than zero".to_owned()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host.ip(), self.port)
    }
}

fn production_from_env() -> bool {
    env::var("ARBOL_ENV").is_ok_and(|v| v == "production")
}
