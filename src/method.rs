//! The verbs a leaf can answer to.

use std::fmt;
use std::str::FromStr;

/// A leaf's HTTP method. `All` answers every method on its path.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Method {
    #[default]
    Get,
    Put,
    Patch,
    Post,
    Delete,
    All,
}

impl Method {
    /// Lower-case name, as written in route definitions (`"get"`, `"all"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get    => "get",
            Self::Put    => "put",
            Self::Patch  => "patch",
            Self::Post   => "post",
            Self::Delete => "delete",
            Self::All    => "all",
        }
    }

    /// The wire method this verb is registered under; `None` for `All`.
    pub(crate) fn to_http(self) -> Option<http::Method> {
        match self {
            Self::Get    => Some(http::Method::GET),
            Self::Put    => Some(http::Method::PUT),
            Self::Patch  => Some(http::Method::PATCH),
            Self::Post   => Some(http::Method::POST),
            Self::Delete => Some(http::Method::DELETE),
            Self::All    => None,
        }
    }
}

/// Case-insensitive: `"GET"`, `"get"` and `"Get"` all parse.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get"    => Ok(Self::Get),
            "put"    => Ok(Self::Put),
            "patch"  => Ok(Self::Patch),
            "post"   => Ok(Self::Post),
            "delete" => Ok(Self::Delete),
            "all"    => Ok(Self::All),
            _        => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_any_case() {
        assert_eq!("GET".parse::<Method>(), Ok(Method::Get));
        assert_eq!("delete".parse::<Method>(), Ok(Method::Delete));
        assert_eq!("All".parse::<Method>(), Ok(Method::All));
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn all_has_no_single_wire_method() {
        assert_eq!(Method::All.to_http(), None);
        assert_eq!(Method::Patch.to_http(), Some(http::Method::PATCH));
    }
}
