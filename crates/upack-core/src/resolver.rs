//! Version resolution against a feed.
//!
//! A pinned version is trusted as-is and never touches the network, so a
//! cached install of a pinned version works offline. Only an unspecified
//! version (or the literal `latest`) asks the feed for its version list.

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use upack_schema::{Credentials, PackageIdentifier, PackageVersion, ParseError};

use crate::io::fetch::{InvalidSource, feed_endpoint};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidVersion(#[from] ParseError),

    #[error(transparent)]
    InvalidSource(#[from] InvalidSource),

    #[error("No {kind} version of {package} found on the feed")]
    NotFound {
        package: String,
        kind: &'static str,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Version listing as returned by the feed's `packages` endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionListing {
    Package {
        #[serde(default)]
        versions: Vec<String>,
    },
    Bare(Vec<String>),
}

impl VersionListing {
    fn into_versions(self) -> Vec<String> {
        match self {
            Self::Package { versions } | Self::Bare(versions) => versions,
        }
    }
}

/// Build the version listing URL: `{source}/packages?group={group}&name={name}`.
pub fn versions_url(source: &str, id: &PackageIdentifier) -> Result<Url, InvalidSource> {
    let mut url = feed_endpoint(source, ["packages"])?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(group) = id.group() {
            query.append_pair("group", group);
        }
        query.append_pair("name", id.name());
    }
    Ok(url)
}

/// Pick the highest version, ignoring prereleases unless `prerelease` is set.
///
/// Entries that are not valid semantic versions are skipped.
pub fn select_latest<'a>(
    versions: impl IntoIterator<Item = &'a str>,
    prerelease: bool,
) -> Option<PackageVersion> {
    versions
        .into_iter()
        .filter_map(|raw| match PackageVersion::parse(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(version = raw, error = %e, "skipping unparseable feed version");
                None
            }
        })
        .filter(|v| prerelease || !v.is_prerelease())
        .max()
}

/// Returns the concrete version requested, or `None` if the feed must be asked.
fn pinned_version(spec: Option<&str>) -> Result<Option<PackageVersion>, ParseError> {
    match spec.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("latest") => Ok(None),
        Some(s) => PackageVersion::parse(s).map(Some),
    }
}

/// Turn an optional version spec into one concrete version.
///
/// # Errors
///
/// - [`ResolveError::InvalidVersion`] for a malformed pinned version
/// - [`ResolveError::NotFound`] if the feed has no such package or no version
///   passes the prerelease filter
/// - [`ResolveError::Http`] on transport or HTTP failure (not retried)
pub async fn resolve_version(
    client: &Client,
    source: &str,
    id: &PackageIdentifier,
    spec: Option<&str>,
    credentials: Option<&Credentials>,
    prerelease: bool,
) -> Result<PackageVersion, ResolveError> {
    if let Some(version) = pinned_version(spec)? {
        debug!(package = %id, %version, "using pinned version");
        return Ok(version);
    }

    let url = versions_url(source, id)?;
    debug!(%url, package = %id, prerelease, "querying feed for latest version");

    let mut request = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.user, Some(&creds.password));
    }

    let kind = if prerelease { "prerelease or stable" } else { "stable" };
    let not_found = || ResolveError::NotFound {
        package: id.to_string(),
        kind,
    };

    let response = request.send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Err(not_found());
    }
    let listing: VersionListing = response.error_for_status()?.json().await?;
    let versions = listing.into_versions();

    let version =
        select_latest(versions.iter().map(String::as_str), prerelease).ok_or_else(not_found)?;
    debug!(package = %id, %version, candidates = versions.len(), "resolved latest version");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn id(s: &str) -> PackageIdentifier {
        PackageIdentifier::parse(s).unwrap()
    }

    #[test]
    fn latest_stable_ignores_prereleases() {
        let versions = ["1.0.0", "1.1.0", "2.0.0-beta"];
        assert_eq!(
            select_latest(versions, false).unwrap().to_string(),
            "1.1.0"
        );
        assert_eq!(
            select_latest(versions, true).unwrap().to_string(),
            "2.0.0-beta"
        );
    }

    #[test]
    fn only_prereleases_without_flag_is_none() {
        assert!(select_latest(["1.0.0-rc.1", "not-a-version"], false).is_none());
    }

    #[test]
    fn versions_url_includes_group_only_when_present() {
        let url = versions_url("https://feed.example/upack/Main/", &id("tools/x:hdars")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://feed.example/upack/Main/packages?group=tools%2Fx&name=hdars"
        );
        let url = versions_url("https://feed.example/upack/Main", &id("hdars")).unwrap();
        assert_eq!(url.query(), Some("name=hdars"));
    }

    #[tokio::test]
    async fn pinned_version_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let v = resolve_version(
            &Client::new(),
            &server.url(),
            &id("grp:hdars"),
            Some("3.1.4-alpha+build.7"),
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(v.to_string(), "3.1.4-alpha+build.7");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_pin_is_rejected_without_request() {
        let err = resolve_version(
            &Client::new(),
            "http://127.0.0.1:9",
            &id("hdars"),
            Some("1.x"),
            None,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidVersion(_)));
    }

    #[tokio::test]
    async fn latest_queries_feed() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/packages")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("group".into(), "grp".into()),
                Matcher::UrlEncoded("name".into(), "hdars".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"group":"grp","name":"hdars","versions":["1.0.0","2.0.0-beta","1.1.0"]}"#)
            .expect(2)
            .create_async()
            .await;

        let client = Client::new();
        let stable = resolve_version(&client, &server.url(), &id("grp:hdars"), None, None, false)
            .await
            .unwrap();
        let pre = resolve_version(
            &client,
            &server.url(),
            &id("grp:hdars"),
            Some("latest"),
            None,
            true,
        )
        .await
        .unwrap();

        assert_eq!(stable.to_string(), "1.1.0");
        assert_eq!(pre.to_string(), "2.0.0-beta");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bare_array_listing_is_accepted() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/packages")
            .match_query(Matcher::UrlEncoded("name".into(), "hdars".into()))
            .with_status(200)
            .with_body(r#"["0.9.0","0.10.0"]"#)
            .create_async()
            .await;

        let v = resolve_version(&Client::new(), &server.url(), &id("hdars"), None, None, false)
            .await
            .unwrap();
        assert_eq!(v.to_string(), "0.10.0");
    }

    #[tokio::test]
    async fn unknown_package_is_not_found() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/packages")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let err = resolve_version(&Client::new(), &server.url(), &id("nope"), None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn no_stable_version_is_not_found() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/packages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"versions":["1.0.0-rc.1"]}"#)
            .create_async()
            .await;

        let err = resolve_version(&Client::new(), &server.url(), &id("hdars"), None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn server_error_is_transport_failure() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/packages")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let err = resolve_version(&Client::new(), &server.url(), &id("hdars"), None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Http(_)));
    }
}
