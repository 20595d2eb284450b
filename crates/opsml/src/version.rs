//! Semantic versioning for cards
//!
//! Wraps the `semver` crate with the card specific notions of partial
//! versions (`"2"`, `"2.3"`), increment types and tagged pre-release/build
//! bumps. Range queries (`^`, `~`, `*`) live in [`VersionQuery`].

use crate::error::VersionError;
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Default token used for pre-release bumps (`1.0.0-rc.1`)
pub const DEFAULT_PRE_TAG: &str = "rc";

/// Default token used for build bumps (`1.0.0+build.1`)
pub const DEFAULT_BUILD_TAG: &str = "build";

/// Which component of a version gets incremented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Major,
    #[default]
    Minor,
    Patch,
    Pre,
    Build,
    PreBuild,
}

impl VersionType {
    /// Whether this increment only touches pre-release/build tags
    pub fn is_tag_increment(&self) -> bool {
        matches!(self, VersionType::Pre | VersionType::Build | VersionType::PreBuild)
    }

    /// Whether this increment creates a release candidate
    pub fn creates_prerelease(&self) -> bool {
        matches!(self, VersionType::Pre | VersionType::PreBuild)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Major => "major",
            VersionType::Minor => "minor",
            VersionType::Patch => "patch",
            VersionType::Pre => "pre",
            VersionType::Build => "build",
            VersionType::PreBuild => "pre_build",
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionType {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "major" => Ok(VersionType::Major),
            "minor" => Ok(VersionType::Minor),
            "patch" => Ok(VersionType::Patch),
            "pre" => Ok(VersionType::Pre),
            "build" => Ok(VersionType::Build),
            "pre_build" => Ok(VersionType::PreBuild),
            other => Err(VersionError::InvalidQuery {
                query: other.to_string(),
                reason: "unknown version type".to_string(),
            }),
        }
    }
}

/// A user supplied card version, either full semver or partial
///
/// Full versions (`major.minor.patch[-pre][+build]`) are validated by the
/// `semver` crate. Partial versions (`major` or `major.minor`) must be
/// purely numeric and never carry tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardVersion {
    version: String,
    splits: Vec<u64>,
    full: Option<Version>,
}

impl CardVersion {
    /// Parse a full or partial version string
    pub fn parse(version: &str) -> Result<Self, VersionError> {
        let version = version.trim();
        let parts: Vec<&str> = version.split('.').collect();

        if parts.len() >= 3 {
            let full = Version::parse(version).map_err(|_| VersionError::InvalidVersion {
                version: version.to_string(),
            })?;
            return Ok(Self {
                version: version.to_string(),
                splits: vec![full.major, full.minor, full.patch],
                full: Some(full),
            });
        }

        if version.contains('-') || version.contains('+') {
            return Err(VersionError::PartialWithTags {
                version: version.to_string(),
            });
        }

        let splits = parts
            .iter()
            .map(|part| {
                if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                    return Err(VersionError::InvalidVersion {
                        version: version.to_string(),
                    });
                }
                part.parse::<u64>().map_err(|_| VersionError::InvalidVersion {
                    version: version.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version: version.to_string(),
            splits,
            full: None,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.version
    }

    pub fn is_full_semver(&self) -> bool {
        self.full.is_some()
    }

    /// The parsed semver, only present for full versions
    pub fn semver(&self) -> Option<&Version> {
        self.full.as_ref()
    }

    pub fn has_major_minor(&self) -> bool {
        self.splits.len() >= 2
    }

    pub fn major(&self) -> u64 {
        self.splits[0]
    }

    pub fn minor(&self) -> Option<u64> {
        self.splits.get(1).copied()
    }

    /// `major.minor.patch` for full versions (tags dropped), the raw string otherwise
    pub fn valid_version(&self) -> String {
        match &self.full {
            Some(v) => format!("{}.{}.{}", v.major, v.minor, v.patch),
            None => self.version.clone(),
        }
    }

    /// Pad a partial version with zeros; strips tags from full versions
    pub fn finalize(&self) -> Version {
        Version::new(
            self.splits[0],
            self.splits.get(1).copied().unwrap_or(0),
            self.splits.get(2).copied().unwrap_or(0),
        )
    }

    /// The version family to search existing records in for an increment type
    ///
    /// Patch increments stay inside `major.minor` (or `major` when only the
    /// major was supplied), minor increments stay inside `major`, and tag
    /// increments stay on the exact `major.minor.patch`. Major increments
    /// search across every version.
    pub fn version_to_search(&self, version_type: VersionType) -> Option<String> {
        match version_type {
            VersionType::Patch => match self.minor() {
                Some(minor) => Some(format!("{}.{}", self.major(), minor)),
                None => Some(self.major().to_string()),
            },
            VersionType::Minor => Some(self.major().to_string()),
            VersionType::Pre | VersionType::Build | VersionType::PreBuild => {
                Some(self.valid_version())
            }
            VersionType::Major => None,
        }
    }
}

impl fmt::Display for CardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.version)
    }
}

impl FromStr for CardVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CardVersion::parse(s)
    }
}

/// A version carries a pre-release tag
pub fn is_release_candidate(version: &Version) -> bool {
    !version.pre.is_empty()
}

/// Compare two version strings by semver precedence
///
/// Strings that fail to parse sort below every valid version.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Sort version strings, highest first
pub fn sort_versions_desc(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(b, a));
}

/// Increment the last numeric run in a tag (`rc.1` -> `rc.2`), or append `.1`
fn increment_tag(tag: &str) -> Result<String, VersionError> {
    let end = tag
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i + 1);

    let Some(end) = end else {
        return Ok(format!("{tag}.1"));
    };

    let start = tag[..end]
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(end);

    let number: u64 = tag[start..end]
        .parse()
        .map_err(|_| VersionError::InvalidVersion {
            version: tag.to_string(),
        })?;

    Ok(format!("{}{}{}", &tag[..start], number + 1, &tag[end..]))
}

/// Bump the pre-release component, starting at `{token}.1`
///
/// Build metadata is cleared.
pub fn bump_prerelease(version: &Version, token: &str) -> Result<Version, VersionError> {
    let tag = if version.pre.is_empty() {
        format!("{token}.1")
    } else {
        increment_tag(version.pre.as_str())?
    };

    let mut next = version.clone();
    next.pre = Prerelease::new(&tag).map_err(|_| VersionError::InvalidVersion {
        version: format!("{}-{}", version, tag),
    })?;
    next.build = BuildMetadata::EMPTY;
    Ok(next)
}

/// Bump the build component, starting at `{token}.1`
pub fn bump_build(version: &Version, token: &str) -> Result<Version, VersionError> {
    let tag = if version.build.is_empty() {
        format!("{token}.1")
    } else {
        increment_tag(version.build.as_str())?
    };

    let mut next = version.clone();
    next.build = BuildMetadata::new(&tag).map_err(|_| VersionError::InvalidVersion {
        version: format!("{}+{}", version, tag),
    })?;
    Ok(next)
}

/// Increment a version according to `version_type`
///
/// Major, minor and patch increments drop any tags and reset lower
/// components to zero.
pub fn increment_version(
    version: &Version,
    version_type: VersionType,
    pre_tag: &str,
    build_tag: &str,
) -> Result<Version, VersionError> {
    match version_type {
        VersionType::Major => Ok(Version::new(version.major + 1, 0, 0)),
        VersionType::Minor => Ok(Version::new(version.major, version.minor + 1, 0)),
        VersionType::Patch => Ok(Version::new(version.major, version.minor, version.patch + 1)),
        VersionType::Pre => bump_prerelease(version, pre_tag),
        VersionType::Build => bump_build(version, build_tag),
        VersionType::PreBuild => {
            let pre = bump_prerelease(version, pre_tag)?;
            bump_build(&pre, build_tag)
        }
    }
}

/// Range symbol allowed in a version query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSymbol {
    /// `^1.2.0`: same major, highest match only
    Caret,
    /// `~1.2.0`: same major.minor, highest match only
    Tilde,
    /// `1.*.*`: wildcard suffix, every match
    Star,
}

impl RangeSymbol {
    pub const ALL: [RangeSymbol; 3] = [RangeSymbol::Caret, RangeSymbol::Tilde, RangeSymbol::Star];

    pub fn as_char(&self) -> char {
        match self {
            RangeSymbol::Caret => '^',
            RangeSymbol::Tilde => '~',
            RangeSymbol::Star => '*',
        }
    }
}

/// A parsed version filter for listing cards
///
/// The filter is a version family prefix: `1` matches `1.0.0`, `1.2.3-rc.1`
/// and `1.9.0+build.2` but not `10.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionQuery {
    prefix: Option<String>,
    symbol: Option<RangeSymbol>,
}

impl VersionQuery {
    /// Parse a query such as `1.2.0`, `2`, `^1.2.0`, `~1.2.0` or `1.*.*`
    pub fn parse(query: &str) -> Result<Self, VersionError> {
        let query = query.trim();
        let symbols: Vec<RangeSymbol> = RangeSymbol::ALL
            .into_iter()
            .filter(|symbol| query.contains(symbol.as_char()))
            .collect();

        if symbols.len() > 1 {
            return Err(VersionError::InvalidQuery {
                query: query.to_string(),
                reason: "only one of '^', '~' or '*' may be used".to_string(),
            });
        }

        let symbol = symbols.first().copied();
        let prefix = match symbol {
            Some(RangeSymbol::Caret) => {
                let stripped = query.replace('^', "");
                stripped.split('.').next().unwrap_or_default().to_string()
            }
            Some(RangeSymbol::Tilde) => {
                let stripped = query.replace('~', "");
                stripped.split('.').take(2).collect::<Vec<_>>().join(".")
            }
            Some(RangeSymbol::Star) => {
                let head = query.split('*').next().unwrap_or_default();
                head.trim_end_matches('.').to_string()
            }
            None => query.to_string(),
        };

        if prefix.is_empty() {
            if symbol == Some(RangeSymbol::Star) {
                return Ok(Self {
                    prefix: None,
                    symbol,
                });
            }
            return Err(VersionError::InvalidQuery {
                query: query.to_string(),
                reason: "empty version".to_string(),
            });
        }

        // Validates the remaining prefix as a full or partial version
        CardVersion::parse(&prefix).map_err(|_| VersionError::InvalidQuery {
            query: query.to_string(),
            reason: format!("{prefix} is not a valid version prefix"),
        })?;

        Ok(Self {
            prefix: Some(prefix),
            symbol,
        })
    }

    /// The version family prefix, `None` when every version matches
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn symbol(&self) -> Option<RangeSymbol> {
        self.symbol
    }

    /// Caret and tilde queries resolve to the single highest match
    pub fn latest_only(&self) -> bool {
        matches!(self.symbol, Some(RangeSymbol::Caret) | Some(RangeSymbol::Tilde))
    }

    /// Whether a stored version belongs to this query's family
    pub fn matches(&self, version: &str) -> bool {
        match &self.prefix {
            None => true,
            Some(prefix) => version_in_family(version, prefix),
        }
    }
}

/// `version` equals `prefix` or extends it with `.`, `-` or `+`
pub fn version_in_family(version: &str, prefix: &str) -> bool {
    match version.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(|c: char| matches!(c, '.' | '-' | '+')),
        None => false,
    }
}
