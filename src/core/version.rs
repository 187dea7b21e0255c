// src/core/version.rs

//! Server version detection and the minimum-version guard run during initialization.

use crate::core::SpinelQError;
use crate::core::client::StoreClient;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// The oldest server version SpinelQ's scripts run on.
pub const MINIMUM_REDIS_VERSION: &str = "5.0.0";

const VERSION_PREFIX: &str = "redis_version:";

/// Finds the `redis_version:` line of an `INFO` reply and returns its value.
pub fn parse_redis_version(info: &str) -> Option<&str> {
    info.split("\r\n")
        .find_map(|line| line.strip_prefix(VERSION_PREFIX))
}

/// One dot-separated pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PreRelease {
    Numeric(u64),
    Alpha(String),
}

impl Ord for PreRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PreRelease::Numeric(a), PreRelease::Numeric(b)) => a.cmp(b),
            (PreRelease::Alpha(a), PreRelease::Alpha(b)) => a.cmp(b),
            // Numeric identifiers sort below alphanumeric ones.
            (PreRelease::Numeric(_), PreRelease::Alpha(_)) => Ordering::Less,
            (PreRelease::Alpha(_), PreRelease::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for PreRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A `major.minor.patch[-pre][+build]` version, ordered by semantic versioning rules.
/// Build metadata is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pre: Vec<PreRelease>,
}

impl SemVer {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl FromStr for SemVer {
    type Err = SpinelQError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SpinelQError::InvalidVersion(s.to_string());

        let without_build = s.split_once('+').map_or(s, |(v, _)| v);
        let (core, pre) = match without_build.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (without_build, None),
        };

        let mut parts = core.split('.');
        let mut component = || -> Result<u64, SpinelQError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let (major, minor, patch) = (component()?, component()?, component()?);
        if parts.next().is_some() {
            return Err(invalid());
        }

        let pre = match pre {
            None => Vec::new(),
            Some(pre) => pre
                .split('.')
                .map(|id| {
                    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                    {
                        Err(invalid())
                    } else if id.bytes().all(|b| b.is_ascii_digit()) {
                        id.parse().map(PreRelease::Numeric).map_err(|_| invalid())
                    } else {
                        Ok(PreRelease::Alpha(id.to_string()))
                    }
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                // A pre-release sorts below its release.
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        for (i, id) in self.pre.iter().enumerate() {
            f.write_str(if i == 0 { "-" } else { "." })?;
            match id {
                PreRelease::Numeric(n) => write!(f, "{n}")?,
                PreRelease::Alpha(s) => f.write_str(s)?,
            }
        }
        Ok(())
    }
}

/// Returns true if version `a` sorts strictly before version `b`.
pub fn less_than(a: &str, b: &str) -> Result<bool, SpinelQError> {
    Ok(a.parse::<SemVer>()? < b.parse::<SemVer>()?)
}

/// Reads the server version from `INFO` and fails if it is older than `minimum`.
/// Returns the reported version string on success.
pub async fn enforce_minimum_version(
    client: &dyn StoreClient,
    minimum: &str,
) -> Result<String, SpinelQError> {
    let info = client.info().await?;
    let version = parse_redis_version(&info)
        .ok_or(SpinelQError::MissingVersion)?
        .to_string();
    debug!("Server reports version {}", version);

    if less_than(&version, minimum)? {
        return Err(SpinelQError::VersionMismatch {
            required: minimum.to_string(),
            actual: version,
        });
    }

    info!("Server version {} satisfies minimum {}", version, minimum);
    Ok(version)
}
