use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("HTTP request returned an error: {status}, `{text}`")]
    Http { status: StatusCode, text: String },
}

/// Initial user, org and bucket to create on a fresh InfluxDB.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    pub username: String,
    pub password: String,
    pub org: String,
    pub bucket: String,
    pub retention_period_seconds: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OnboardingResponse {
    pub auth: Option<Authorization>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Authorization {
    pub token: Option<String>,
}

/// Minimal client for the InfluxDB 2.x HTTP API.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl Client {
    pub fn new(url: &str, token: Option<String>) -> Result<Self, ClientError> {
        Ok(Client {
            http: reqwest::Client::builder().build()?,
            url: url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.url, path));
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Token {token}")),
            None => builder,
        }
    }

    /// Runs the one-time setup of a fresh server and returns what it created.
    pub async fn setup(
        &self,
        request: &OnboardingRequest,
    ) -> Result<OnboardingResponse, ClientError> {
        let response = self
            .request(reqwest::Method::POST, "/api/v2/setup")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(ClientError::Http { status, text });
        }

        Ok(response.json::<OnboardingResponse>().await?)
    }

    /// Writes newline-separated line protocol with nanosecond timestamps.
    pub async fn write_line_protocol(
        &self,
        org: &str,
        bucket: &str,
        body: String,
    ) -> Result<(), ClientError> {
        let response = self
            .request(reqwest::Method::POST, "/api/v2/write")
            .query(&[("org", org), ("bucket", bucket), ("precision", "ns")])
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(ClientError::Http { status, text });
        }

        Ok(())
    }
}
