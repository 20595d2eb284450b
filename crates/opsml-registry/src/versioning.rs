//! Version resolution against the versions already in a registry
//!
//! [`SemVerRegistryValidator`] turns a [`VersionRequest`] plus the existing
//! versions of a card into the next version string. It holds no I/O; the
//! registry table fetches the existing versions and hands them in.

use opsml::version::{
    CardVersion, VersionType, increment_version, is_release_candidate, version_in_family,
};
use opsml::VersionError;
use semver::Version;
use tracing::debug;

use crate::table::VersionRequest;

/// Computes and validates card versions
#[derive(Debug, Clone)]
pub struct SemVerRegistryValidator {
    name: String,
    version_type: VersionType,
    pre_tag: String,
    build_tag: String,
    supplied: Option<CardVersion>,
}

impl SemVerRegistryValidator {
    /// Parse the supplied version and check it suits the version type
    pub fn new(request: &VersionRequest) -> Result<Self, VersionError> {
        let supplied = request
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(CardVersion::parse)
            .transpose()?;

        if request.version_type.is_tag_increment()
            && !supplied.as_ref().is_some_and(CardVersion::is_full_semver)
        {
            return Err(VersionError::RequiresFullSemver {
                version_type: request.version_type.to_string(),
                version: request.version.clone(),
            });
        }

        Ok(Self {
            name: request.name.clone(),
            version_type: request.version_type,
            pre_tag: request.pre_tag.clone(),
            build_tag: request.build_tag.clone(),
            supplied,
        })
    }

    /// A full version supplied with a major/minor/patch type is used verbatim
    pub fn is_pinned(&self) -> bool {
        !self.version_type.is_tag_increment()
            && self
                .supplied
                .as_ref()
                .is_some_and(CardVersion::is_full_semver)
    }

    /// Version family the next version is searched in, `None` for every version
    pub fn version_to_search(&self) -> Option<String> {
        self.supplied
            .as_ref()
            .and_then(|v| v.version_to_search(self.version_type))
    }

    /// Next version given every existing version of the card
    pub fn next_version(&self, existing: &[String]) -> Result<String, VersionError> {
        if self.is_pinned() {
            return self.validate_pinned(existing);
        }

        let family = self.family(existing);
        debug!(
            "Resolving {} version for {} against {} existing",
            self.version_type,
            self.name,
            family.len()
        );

        let next = if self.version_type.is_tag_increment() {
            self.next_tagged(&family)?
        } else {
            self.next_release(&family)?
        };

        Ok(next.to_string())
    }

    /// Existing versions in the search family, highest first
    fn family(&self, existing: &[String]) -> Vec<Version> {
        let search = self.version_to_search();
        let mut family: Vec<Version> = existing
            .iter()
            .filter(|v| match &search {
                Some(prefix) => version_in_family(v, prefix),
                None => true,
            })
            .filter_map(|v| Version::parse(v).ok())
            .collect();
        family.sort_by(|a, b| b.cmp(a));
        family
    }

    fn next_release(&self, family: &[Version]) -> Result<Version, VersionError> {
        let Some(latest) = family.first() else {
            return Ok(self
                .supplied
                .as_ref()
                .map(CardVersion::finalize)
                .unwrap_or_else(|| Version::new(1, 0, 0)));
        };

        increment_version(latest, self.version_type, &self.pre_tag, &self.build_tag)
    }

    fn next_tagged(&self, family: &[Version]) -> Result<Version, VersionError> {
        let supplied = self
            .supplied
            .as_ref()
            .and_then(CardVersion::semver)
            .ok_or_else(|| VersionError::RequiresFullSemver {
                version_type: self.version_type.to_string(),
                version: None,
            })?;

        if self.version_type.creates_prerelease() {
            if let Some(release) = family.iter().find(|v| !is_release_candidate(v)) {
                return Err(VersionError::ReleaseCandidateOverRelease {
                    version: format!("{}.{}.{}", release.major, release.minor, release.patch),
                });
            }
        }

        match family.first() {
            Some(latest) => {
                increment_version(latest, self.version_type, &self.pre_tag, &self.build_tag)
            }
            None if self.already_tagged(supplied) => Ok(supplied.clone()),
            None => increment_version(supplied, self.version_type, &self.pre_tag, &self.build_tag),
        }
    }

    /// The supplied version already carries the tag this type would add
    fn already_tagged(&self, supplied: &Version) -> bool {
        match self.version_type {
            VersionType::Pre => !supplied.pre.is_empty(),
            VersionType::Build => !supplied.build.is_empty(),
            VersionType::PreBuild => !supplied.pre.is_empty() && !supplied.build.is_empty(),
            _ => false,
        }
    }

    /// Reject a pinned version that already exists or shadows a release
    fn validate_pinned(&self, existing: &[String]) -> Result<String, VersionError> {
        let Some(supplied) = self.supplied.as_ref().and_then(CardVersion::semver) else {
            return Err(VersionError::RequiresFullSemver {
                version_type: self.version_type.to_string(),
                version: None,
            });
        };

        let parsed: Vec<Version> = existing
            .iter()
            .filter_map(|v| Version::parse(v).ok())
            .collect();

        if parsed.iter().any(|v| v == supplied) {
            return Err(VersionError::DuplicateVersion {
                name: self.name.clone(),
                version: supplied.to_string(),
            });
        }

        if is_release_candidate(supplied)
            && parsed.iter().any(|v| {
                !is_release_candidate(v)
                    && (v.major, v.minor, v.patch) == (supplied.major, supplied.minor, supplied.patch)
            })
        {
            return Err(VersionError::ReleaseCandidateOverRelease {
                version: format!("{}.{}.{}", supplied.major, supplied.minor, supplied.patch),
            });
        }

        Ok(supplied.to_string())
    }
}
