//! Deployment targets
//!
//! A release level picks the host; the endpoint list is fixed.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::HarnessError;

/// Endpoints hit once per burst, in order
pub const ENDPOINTS: [&str; 3] = [
    "/stac/api/search?limit=1000",
    "/stac/api/search",
    "/stac/api/collections",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseLevel {
    #[default]
    Dev,
    Stage,
    Prod,
}

impl ReleaseLevel {
    pub fn host(&self) -> &'static str {
        match self {
            Self::Dev => "https://datacube-dev.services.geo.ca",
            Self::Stage => "https://datacube-stage.services.geo.ca",
            Self::Prod => "https://datacube.services.geo.ca",
        }
    }
}

/// Resolve the base URL: an explicit override wins over the release level
pub fn base_url(level: ReleaseLevel, override_url: Option<&str>) -> Result<Url, HarnessError> {
    let raw = override_url.unwrap_or(level.host());
    let url = Url::parse(raw).map_err(|source| HarnessError::InvalidBaseUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(HarnessError::UnsupportedScheme(other.to_string())),
    }
}

/// Full target URLs for `base`, one per endpoint.
///
/// Any path on `base` is kept as a prefix (`http://host/proxy` + `/stac/api/...`).
pub fn targets(base: &Url) -> Vec<Url> {
    let prefix = base.path().trim_end_matches('/');
    ENDPOINTS
        .iter()
        .map(|endpoint| {
            let mut url = base.clone();
            let (path, query) = match endpoint.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (*endpoint, None),
            };
            url.set_path(&format!("{prefix}{path}"));
            url.set_query(query);
            url
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_levels_select_hosts() {
        let url = base_url(ReleaseLevel::Stage, None).unwrap();
        assert_eq!(url.host_str(), Some("datacube-stage.services.geo.ca"));

        let url = base_url(ReleaseLevel::Prod, None).unwrap();
        assert_eq!(url.host_str(), Some("datacube.services.geo.ca"));
    }

    #[test]
    fn override_wins() {
        let url = base_url(ReleaseLevel::Prod, Some("http://localhost:8080")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/");
    }

    #[test]
    fn rejects_bad_base_urls() {
        assert!(matches!(
            base_url(ReleaseLevel::Dev, Some("not a url")),
            Err(HarnessError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            base_url(ReleaseLevel::Dev, Some("ftp://example.com")),
            Err(HarnessError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn targets_cover_every_endpoint() {
        let base = base_url(ReleaseLevel::Dev, None).unwrap();
        let urls: Vec<String> = targets(&base).iter().map(Url::to_string).collect();
        assert_eq!(
            urls,
            vec![
                "https://datacube-dev.services.geo.ca/stac/api/search?limit=1000",
                "https://datacube-dev.services.geo.ca/stac/api/search",
                "https://datacube-dev.services.geo.ca/stac/api/collections",
            ]
        );
    }

    #[test]
    fn targets_keep_base_path_prefix() {
        let base = base_url(ReleaseLevel::Dev, Some("http://localhost:8080/proxy/")).unwrap();
        assert_eq!(
            targets(&base)[2].as_str(),
            "http://localhost:8080/proxy/stac/api/collections"
        );
    }
}
