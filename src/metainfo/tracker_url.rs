use reqwest::{IntoUrl, Url};
use serde::{de::Visitor, Deserialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUrl {
    Http(Url),
    Udp(Url),
}

impl TrackerUrl {
    pub fn new(url: impl IntoUrl) -> anyhow::Result<Self> {
        let url = url.into_url()?;
        Ok(match url.scheme() {
            "http" | "https" => Self::Http(url),
            "udp" => Self::Udp(url),
            scheme => anyhow::bail!("unsupported scheme {:?} for tracker", scheme),
        })
    }
}

impl<'a> Deserialize<'a> for TrackerUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        deserializer.deserialize_string(TrackerUrlVisitor)
    }
}

struct TrackerUrlVisitor;
impl<'a> Visitor<'a> for TrackerUrlVisitor {
    type Value = TrackerUrl;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("string url using udp or http scheme")
    }

    // this is what serde_bencode calls for deserializing str.
    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        let url = std::str::from_utf8(v).map_err(serde::de::Error::custom)?;
        self.visit_str(url)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        TrackerUrl::new(v).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://tracker.example:6969/announce", true)]
    #[case("https://tracker.example/announce", true)]
    #[case("udp://tracker.example:1337", false)]
    fn test_scheme(#[case] url: &str, #[case] is_http: bool) {
        let tracker_url = TrackerUrl::new(url).unwrap();
        assert_eq!(matches!(tracker_url, TrackerUrl::Http(_)), is_http);
    }

    #[rstest]
    fn test_rejects_unknown_scheme() {
        assert!(TrackerUrl::new("wss://tracker.example").is_err());
    }
}
