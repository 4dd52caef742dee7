use std::fmt;

use crate::str::Str;

/// A server assigned session id
///
/// A server mints its own fixed width ids, a client has to carry whatever
/// string the handshake returned. Therefore this is an opaque wrapper around
/// the received value. It is empty until the `open` packet is parsed and it is
/// never reassigned afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sid(Str);

impl Sid {
    /// Whether the session id was assigned yet
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// Return a &str representation of the session id
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Str> for Sid {
    fn from(s: Str) -> Self {
        Sid(s)
    }
}
impl From<String> for Sid {
    fn from(s: String) -> Self {
        Sid(Str::from(s))
    }
}
impl From<&'static str> for Sid {
    fn from(s: &'static str) -> Self {
        Sid(Str::from(s))
    }
}

impl<'de> serde::Deserialize<'de> for Sid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Sid(Str::from(s)))
    }
}
