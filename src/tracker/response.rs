use super::peers::PeerAddresses;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerResponse {
    #[serde(rename = "interval")]
    pub request_interval_seconds: u64,

    #[serde(rename = "peers")]
    pub peer_addresses: PeerAddresses,
}

// seperate from TrackerResponse so a failure reason can be decoded too and turned into an error.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TrackerResponseResult {
    Failure {
        #[serde(rename = "failure reason")]
        failure_reason: String,
    },
    Success(TrackerResponse),
}

impl From<TrackerResponseResult> for anyhow::Result<TrackerResponse> {
    fn from(result: TrackerResponseResult) -> Self {
        match result {
            TrackerResponseResult::Success(tracker_response) => Ok(tracker_response),
            TrackerResponseResult::Failure { failure_reason } => {
                anyhow::bail!("{} (Tracker)", failure_reason)
            }
        }
    }
}
