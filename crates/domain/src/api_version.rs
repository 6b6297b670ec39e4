use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An NMOS API version, e.g. `v1.2`.
///
/// Ordering is (major, minor), so `v1.3 > v1.2 > v1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

pub const V1_0: ApiVersion = ApiVersion { major: 1, minor: 0 };
pub const V1_1: ApiVersion = ApiVersion { major: 1, minor: 1 };
pub const V1_2: ApiVersion = ApiVersion { major: 1, minor: 2 };
pub const V1_3: ApiVersion = ApiVersion { major: 1, minor: 3 };

/// IS-04 versions this node implements, ascending.
pub fn is04_versions() -> Vec<ApiVersion> {
    vec![V1_0, V1_1, V1_2, V1_3]
}

/// IS-05 versions this node implements, ascending.
pub fn is05_versions() -> Vec<ApiVersion> {
    vec![V1_0, V1_1]
}

impl ApiVersion {
    pub fn parse(s: &str) -> Result<ApiVersion> {
        let rest = s
            .strip_prefix('v')
            .ok_or_else(|| Error::Validation(format!("bad api version: {s}")))?;
        let (major, minor) = rest
            .split_once('.')
            .ok_or_else(|| Error::Validation(format!("bad api version: {s}")))?;
        Ok(ApiVersion {
            major: major
                .parse()
                .map_err(|_| Error::Validation(format!("bad api version: {s}")))?,
            minor: minor
                .parse()
                .map_err(|_| Error::Validation(format!("bad api version: {s}")))?,
        })
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        ApiVersion::parse(&s)
    }
}

impl From<ApiVersion> for String {
    fn from(v: ApiVersion) -> String {
        v.to_string()
    }
}
