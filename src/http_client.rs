use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;

use crate::fetch::{API_KEY_HEADER, RawResponse, Transport, TransportError};

const REQUEST_TIMEOUT_SECS: u64 = 30;

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

impl Transport for Client {
    fn request(
        &self,
        url: &str,
        query: &[(String, String)],
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        let resp = self
            .get(url)
            .query(query)
            .header(USER_AGENT, "odds-history/0.1")
            .header(API_KEY_HEADER, api_key)
            .send()
            .map_err(classify_reqwest_error)?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|err| TransportError::Network(format!("failed reading body: {err}")))?;
        Ok(RawResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::Request(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
