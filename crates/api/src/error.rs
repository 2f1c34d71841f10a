use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("request to {url} failed: {source}"))]
    Request {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("{url} returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode response from {url}: {source}"))]
    DecodeBody {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode payload from {url}: {source}"))]
    DecodePayload {
        stage: &'static str,
        url: String,
        source: serde_json::Error,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// HTTP status attached to the failure, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request { .. } | Self::DecodeBody { .. } | Self::DecodePayload { .. } => None,
        }
    }

    /// Returns true when the server answered 404 for the requested entity.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
