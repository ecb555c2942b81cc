use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use url::Url;

/// The original URL a short code redirects to.
///
/// Always an absolute `http` or `https` URL with a host. The stored form is
/// the normalized serialization produced by the `url` crate, so
/// `https://example.com` and `https://example.com/` are the same destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination(Url);

impl Destination {
    /// Parses and validates a destination URL.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CoreError::InvalidUrl("URL cannot be empty".to_string()));
        }

        let url = Url::parse(input)
            .map_err(|e| CoreError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CoreError::InvalidUrl(format!(
                    "URL scheme must be http or https: {other}"
                )))
            }
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(CoreError::InvalidUrl(format!("URL must have a host: {input}")));
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl std::str::FromStr for Destination {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Destination {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Destination::parse(&raw).map_err(serde::de::Error::custom)
    }
}
