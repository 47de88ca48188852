//! Applet identities and the image/container naming convention.
//!
//! Image repository: `na-<naType>-<naVersion>-<packageName>`, tag `<version>`.
//! Container name: `na-<naType>-<naVersion>-<packageName>_<version>-<appletId>`.

use serde::{Deserialize, Serialize};

/// Namespace segment every managed image starts with.
pub const IMAGE_NAMESPACE: &str = "na";

/// Runtime kinds and versions applets may be built for.
pub const SUPPORTED_RUNTIMES: &[(&str, &str)] = &[("npm", "8.3.0")];

pub fn is_supported_runtime(na_type: &str, na_version: &str) -> bool {
    SUPPORTED_RUNTIMES
        .iter()
        .any(|(t, v)| *t == na_type && *v == na_version)
}

/// A built applet artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppletImage {
    pub na_type: String,
    pub na_version: String,
    pub package_name: String,
    pub version: String,
}

impl AppletImage {
    pub fn new(
        na_type: impl Into<String>,
        na_version: impl Into<String>,
        package_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            na_type: na_type.into(),
            na_version: na_version.into(),
            package_name: package_name.into(),
            version: version.into(),
        }
    }

    /// `na-<naType>-<naVersion>-<packageName>`
    pub fn repository(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            IMAGE_NAMESPACE, self.na_type, self.na_version, self.package_name
        )
    }

    /// `<repository>:<version>`
    pub fn image_name(&self) -> String {
        format!("{}:{}", self.repository(), self.version)
    }

    pub fn is_supported(&self) -> bool {
        is_supported_runtime(&self.na_type, &self.na_version)
    }
}

/// An applet image bound to a control-plane applet id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppletRoute {
    pub applet_id: String,
    #[serde(flatten)]
    pub image: AppletImage,
}

impl AppletRoute {
    pub fn new(applet_id: impl Into<String>, image: AppletImage) -> Self {
        Self {
            applet_id: applet_id.into(),
            image,
        }
    }

    /// `na-<naType>-<naVersion>-<packageName>_<version>-<appletId>`
    pub fn container_name(&self) -> String {
        format!(
            "{}_{}-{}",
            self.image.repository(),
            self.image.version,
            self.applet_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppletRunOptions {
    #[serde(flatten)]
    pub route: AppletRoute,
    pub applet_token: String,
}

/// A running applet instance, as observed on the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppletStatus {
    #[serde(flatten)]
    pub image: AppletImage,
    pub applet_id: String,
    pub ip: String,
    pub port: u16,
    pub status: String,
    pub running: bool,
}

/// A named, schedulable entry point of an applet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Worker {
    pub handler: String,
    pub name: String,
}

impl Worker {
    /// Applet-side path a work request is posted to.
    pub fn uri(&self) -> String {
        format!("/workers/{}/{}", self.handler, self.name)
    }
}

/// Parse `na-<naType>-<naVersion>-<packageName>:<version>` back into an image.
///
/// Returns `None` for anything outside the managed namespace or the supported
/// runtime set.
pub fn parse_applet_image(image_name: &str) -> Option<AppletImage> {
    let (repository, version) = image_name.split_once(':')?;
    if version.is_empty() {
        return None;
    }

    let mut segments = repository.split('-');
    let namespace = segments.next()?;
    let na_type = segments.next()?;
    let na_version = segments.next()?;
    let package_name = segments.collect::<Vec<_>>().join("-");

    if namespace != IMAGE_NAMESPACE
        || !is_supported_runtime(na_type, na_version)
        || package_name.is_empty()
    {
        return None;
    }

    Some(AppletImage::new(na_type, na_version, package_name, version))
}

/// Recover the applet id from a container name built by [`AppletRoute::container_name`].
pub fn applet_id_from_container(image: &AppletImage, container_name: &str) -> Option<String> {
    let prefix = format!("{}_{}-", image.repository(), image.version);
    container_name
        .strip_prefix(&prefix)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Parse a `<packageName>@<version>` command-line target.
pub fn parse_target(target: &str) -> Option<(String, String)> {
    let (package_name, version) = target.rsplit_once('@')?;
    if package_name.is_empty() || version.is_empty() {
        return None;
    }
    Some((package_name.to_string(), version.to_string()))
}
