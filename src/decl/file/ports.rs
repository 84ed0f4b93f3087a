use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A container port with its transport protocol, written `tcp:5000`, `udp:53`
/// or just `5000` where tcp is assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    Tcp(u16),
    Udp(u16),
}

impl Port {
    pub fn number(&self) -> u16 {
        match self {
            Port::Tcp(port) | Port::Udp(port) => *port,
        }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Port::Tcp(_))
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Tcp(port) => write!(f, "tcp:{port}"),
            Port::Udp(port) => write!(f, "udp:{port}"),
        }
    }
}

impl Serialize for Port {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            // Bare numbers read better in the descriptor.
            Port::Tcp(port) => serializer.serialize_u16(*port),
            Port::Udp(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

fn port_from_i64<E: de::Error>(v: i64) -> Result<u16, E> {
    u16::try_from(v).map_err(|_| de::Error::custom(format!("port {v} is out of range 0-65535")))
}

impl<'de> Deserialize<'de> for Port {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PortVisitor;

        impl Visitor<'_> for PortVisitor {
            type Value = Port;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "a string with protocol:port or just a number where tcp will be assumed",
                )
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Port::Tcp(port_from_i64(v)?))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_i64(i64::try_from(v).unwrap_or(i64::MAX))
            }

            fn visit_str<E>(self, value: &str) -> Result<Port, E>
            where
                E: de::Error,
            {
                if let Ok(port) = value.parse::<u16>() {
                    return Ok(Port::Tcp(port));
                }

                match value.split_once(':') {
                    Some((proto, port_str)) => {
                        let port = port_str.parse::<u16>().map_err(de::Error::custom)?;
                        match proto.to_ascii_lowercase().as_str() {
                            "tcp" => Ok(Port::Tcp(port)),
                            "udp" => Ok(Port::Udp(port)),
                            _ => Err(de::Error::custom("protocol must be 'tcp' or 'udp'")),
                        }
                    }
                    None => Err(de::Error::custom("invalid port format")),
                }
            }
        }

        deserializer.deserialize_any(PortVisitor)
    }
}

/// Inclusive port range of a traffic rule: `5000`, `"8000-8010"` or `"all"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub const ALL: PortRange = PortRange { from: 0, to: 65535 };

    pub fn single(port: u16) -> Self {
        PortRange { from: port, to: port }
    }

    pub fn is_well_formed(&self) -> bool {
        self.from <= self.to
    }

    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == PortRange::ALL {
            f.write_str("all")
        } else if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.from == self.to {
            serializer.serialize_u16(self.from)
        } else {
            serializer.serialize_str(&self.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RangeVisitor;

        impl Visitor<'_> for RangeVisitor {
            type Value = PortRange;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a port number, a 'from-to' range or 'all'")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(PortRange::single(port_from_i64(v)?))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_i64(i64::try_from(v).unwrap_or(i64::MAX))
            }

            fn visit_str<E>(self, value: &str) -> Result<PortRange, E>
            where
                E: de::Error,
            {
                let value = value.trim();
                if value.eq_ignore_ascii_case("all") {
                    return Ok(PortRange::ALL);
                }
                match value.split_once('-') {
                    // Ordering is checked by validation so the error can name the rule.
                    Some((from, to)) => Ok(PortRange {
                        from: from.trim().parse().map_err(de::Error::custom)?,
                        to: to.trim().parse().map_err(de::Error::custom)?,
                    }),
                    None => Ok(PortRange::single(value.parse().map_err(de::Error::custom)?)),
                }
            }
        }

        deserializer.deserialize_any(RangeVisitor)
    }
}
