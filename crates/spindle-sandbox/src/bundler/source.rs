//! Package lookup for the dependency bundler.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use semver::{Version, VersionReq};
use serde::Deserialize;

use super::package_key;
use crate::error::DependencyResolutionError;

const PACKAGE_MANIFEST: &str = "package.json";
const DEFAULT_ENTRY: &str = "index.js";

/// On-disk location of a package and its entry module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLocation {
    root: PathBuf,
    entry: PathBuf,
}

impl PackageLocation {
    /// Creates a location. `entry` must live below `root`.
    #[must_use]
    pub const fn new(root: PathBuf, entry: PathBuf) -> Self {
        Self { root, entry }
    }

    /// Returns the package directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the entry module path.
    #[must_use]
    pub fn entry(&self) -> &Path {
        &self.entry
    }
}

/// Locates the files of a named, versioned package.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Finds `name` at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`DependencyResolutionError`] when the package is missing,
    /// declares a different version, or has no readable entry module.
    async fn locate(
        &self,
        name: &str,
        version: &str,
    ) -> Result<PackageLocation, DependencyResolutionError>;
}

/// Reads packages from a local directory tree.
///
/// For a request `(name, version)` the source checks
/// `<root>/<name>@<version>/` and then `<root>/<name>/`. The entry module is
/// taken from `package.json` (`module`, then `main`) and defaults to
/// `index.js`. A `version` field in `package.json` must satisfy the
/// requested version.
#[derive(Debug, Clone)]
pub struct DirectoryPackageSource {
    root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct PackageManifest {
    version: Option<String>,
    module: Option<String>,
    main: Option<String>,
}

impl DirectoryPackageSource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the package root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn describe(
        &self,
        key: &str,
        directory: PathBuf,
        version: &str,
    ) -> Result<PackageLocation, DependencyResolutionError> {
        let manifest = read_manifest(key, &directory).await?;
        if let Some(found) = manifest.version.as_deref() {
            if !version_satisfies(version, found) {
                return Err(DependencyResolutionError::new(
                    key,
                    format!("{} declares version {found}", directory.display()),
                ));
            }
        }

        let declared = manifest
            .module
            .or(manifest.main)
            .unwrap_or_else(|| String::from(DEFAULT_ENTRY));
        for candidate in module_candidates(&directory.join(&declared)) {
            if is_file(&candidate).await {
                return Ok(PackageLocation::new(directory, candidate));
            }
        }
        Err(DependencyResolutionError::new(
            key,
            format!("entry module '{declared}' not found in {}", directory.display()),
        ))
    }
}

#[async_trait]
impl PackageSource for DirectoryPackageSource {
    async fn locate(
        &self,
        name: &str,
        version: &str,
    ) -> Result<PackageLocation, DependencyResolutionError> {
        let key = package_key(name, version);
        if !is_safe_package_name(name) {
            return Err(DependencyResolutionError::new(
                key,
                "package names must be relative and may not contain '..'",
            ));
        }

        let versioned = self.root.join(format!("{name}@{version}"));
        let unversioned = self.root.join(name);
        for directory in [versioned, unversioned] {
            if is_dir(&directory).await {
                return self.describe(&key, directory, version).await;
            }
        }
        Err(DependencyResolutionError::new(
            key,
            format!("package not found under {}", self.root.display()),
        ))
    }
}

async fn read_manifest(
    key: &str,
    directory: &Path,
) -> Result<PackageManifest, DependencyResolutionError> {
    let path = directory.join(PACKAGE_MANIFEST);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => serde_json::from_str(&text).map_err(|error| {
            DependencyResolutionError::new(key, format!("invalid {PACKAGE_MANIFEST}: {error}"))
        }),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Ok(PackageManifest::default())
        }
        Err(error) => Err(DependencyResolutionError::io(
            key,
            format!("cannot read {}", path.display()),
            error,
        )),
    }
}

/// Exact versions must be equal; anything else is treated as a range.
fn version_satisfies(requested: &str, found: &str) -> bool {
    if requested == found {
        return true;
    }
    let Ok(actual) = Version::parse(found) else {
        return false;
    };
    if let Ok(exact) = Version::parse(requested) {
        return exact == actual;
    }
    VersionReq::parse(requested).is_ok_and(|range| range.matches(&actual))
}

fn is_safe_package_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Files tried, in order, for a module path written without an extension.
pub(crate) fn module_candidates(path: &Path) -> [PathBuf; 4] {
    let with_extension = |extension: &str| {
        let mut raw = path.as_os_str().to_owned();
        raw.push(extension);
        PathBuf::from(raw)
    };
    [
        path.to_path_buf(),
        with_extension(".js"),
        with_extension(".mjs"),
        path.join(DEFAULT_ENTRY),
    ]
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_dir())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("4.17.21", "4.17.21", true)]
    #[case("4.17.21", "4.17.22", false)]
    #[case("^4.17.0", "4.17.21", true)]
    #[case("~1.2.0", "1.3.0", false)]
    #[case("*", "0.0.1", true)]
    #[case("latest", "1.0.0", false)]
    fn version_matching(#[case] requested: &str, #[case] found: &str, #[case] expected: bool) {
        assert_eq!(version_satisfies(requested, found), expected);
    }

    #[rstest]
    #[case("lodash", true)]
    #[case("@scope/pkg", true)]
    #[case("../escape", false)]
    #[case("/etc", false)]
    #[case("", false)]
    fn package_names_stay_below_the_root(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_safe_package_name(name), expected);
    }
}
