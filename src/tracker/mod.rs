pub mod peers;
pub mod request;
pub mod response;

pub use peers::PeerAddresses;
pub use request::TrackerRequest;
pub use response::{TrackerResponse, TrackerResponseResult};

use crate::metainfo::TrackerUrl;
use crate::prelude::*;
use anyhow::Context;
use reqwest::{Client, Url};

pub struct HttpTracker<'a> {
    client: &'a Client,
    url: Url,
}

impl<'a> HttpTracker<'a> {
    pub fn new(client: &'a Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn from_tracker_url(client: &'a Client, url: TrackerUrl) -> anyhow::Result<Self> {
        match url {
            TrackerUrl::Http(url) => Ok(Self::new(client, url)),
            TrackerUrl::Udp(url) => anyhow::bail!("udp tracker {url} is not supported"),
        }
    }

    fn announce_url(&self, request: &TrackerRequest) -> Url {
        let mut url = self.url.clone();
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => {
                format!("{existing}&{}", request.to_url_query())
            }
            _ => request.to_url_query(),
        };
        url.set_query(Some(&query));
        url
    }

    #[instrument(name = "announce", level = "info", skip_all, fields(tracker = %self.url))]
    pub async fn announce(&self, request: &TrackerRequest) -> anyhow::Result<TrackerResponse> {
        let url = self.announce_url(request);
        debug!(%url, "sending tracker request");

        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("tracker request failed")?
            .error_for_status()
            .context("tracker returned an error status")?
            .bytes()
            .await
            .context("reading tracker response")?;

        let result: TrackerResponseResult =
            serde_bencode::from_bytes(&body).map_err(anyhow::Error::msg)?;
        let response: anyhow::Result<TrackerResponse> = result.into();
        let response = response?;

        info!(
            peers = response.peer_addresses.len(),
            interval = response.request_interval_seconds,
            "tracker announce succeeded"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::{InfoHash, PeerId};
    use rstest::rstest;

    #[rstest]
    fn test_announce_url_keeps_existing_query() {
        let client = Client::new();
        let url = Url::parse("http://t.example/announce?key=abc").unwrap();
        let tracker = HttpTracker::new(&client, url);
        let request = TrackerRequest::from_parts(
            InfoHash::new([b'a'; 20]),
            PeerId::new([b'b'; 20]),
            6881,
            7,
        );

        let announce = tracker.announce_url(&request);
        assert!(announce.as_str().starts_with("http://t.example/announce?key=abc&compact=1"));
    }

    #[rstest]
    fn test_udp_rejected() {
        let client = Client::new();
        let url = TrackerUrl::new("udp://t.example:80").unwrap();
        assert!(HttpTracker::from_tracker_url(&client, url).is_err());
    }
}
