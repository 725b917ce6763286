use super::dsn::StoreDescriptor;
use super::point::{encode_batch, Point};
use super::PointSink;
use crate::error::SinkError;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

/// InfluxDB 1.x HTTP API client.
///
/// Not `Debug`: the write URL carries credentials.
#[derive(Clone)]
pub struct InfluxSink {
    client: Client,
    descriptor: StoreDescriptor,
    write_url: Url,
    ping_url: Url,
}

impl InfluxSink {
    pub fn new(descriptor: StoreDescriptor, request_timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| SinkError::Connect(format!("failed to build HTTP client: {err}")))?;

        let base = descriptor.address.trim_end_matches('/');
        let mut write_url = endpoint(base, "write")?;
        {
            let mut query = write_url.query_pairs_mut();
            query
                .append_pair("db", &descriptor.database)
                .append_pair("precision", descriptor.precision.as_query_value());
            if !descriptor.username.is_empty() {
                query
                    .append_pair("u", &descriptor.username)
                    .append_pair("p", &descriptor.password);
            }
        }
        let ping_url = endpoint(base, "ping")?;

        Ok(Self {
            client,
            descriptor,
            write_url,
            ping_url,
        })
    }

    pub fn descriptor(&self) -> &StoreDescriptor {
        &self.descriptor
    }
}

fn endpoint(base: &str, path: &str) -> Result<Url, SinkError> {
    Url::parse(&format!("{base}/{path}"))
        .map_err(|err| SinkError::Connect(format!("invalid store address {base:?}: {err}")))
}

fn request_error(err: reqwest::Error) -> SinkError {
    if err.is_connect() {
        SinkError::Connect(err.to_string())
    } else {
        SinkError::Write(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Rejected {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl PointSink for InfluxSink {
    async fn ping(&self) -> Result<(), SinkError> {
        let response = self
            .client
            .get(self.ping_url.clone())
            .send()
            .await
            .map_err(|err| SinkError::Connect(err.to_string()))?;
        check_status(response).await
    }

    async fn write_points(&self, points: &[Point]) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = encode_batch(points, self.descriptor.precision);
        let response = self
            .client
            .post(self.write_url.clone())
            .body(body)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response).await?;

        debug!(
            points = points.len(),
            database = %self.descriptor.database,
            "wrote batch to store"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "influxdb {} db={}",
            self.descriptor.address, self.descriptor.database
        )
    }
}
