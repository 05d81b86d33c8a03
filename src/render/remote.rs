//! Remote engine: fetches rendered artifacts from a PlantUML server.
//!
//! The diagram text travels in the URL as raw DEFLATE compressed with
//! URL-safe base64 on top, marked by the `~1` prefix:
//! `GET {server}/{format}/~1{encoded}`.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use tracing::debug;
use ureq::Agent;
use ureq::tls::{RootCerts, TlsConfig, TlsProvider};

use super::RenderEngine;
use crate::diagram::Format;
use crate::error::EngineError;

pub struct RemoteEngine {
    server_path: String,
    agent: Agent,
}

impl std::fmt::Debug for RemoteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEngine")
            .field("server_path", &self.server_path)
            .finish_non_exhaustive()
    }
}

impl RemoteEngine {
    /// Engine talking to `server_path` with a per-request timeout.
    pub fn new(server_path: impl Into<String>, timeout: Duration) -> Self {
        let tls_config = TlsConfig::builder()
            .provider(TlsProvider::NativeTls)
            .root_certs(RootCerts::PlatformVerifier)
            .build();

        let agent = Agent::config_builder()
            .tls_config(tls_config)
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            server_path: server_path.into(),
            agent,
        }
    }

    pub fn server_path(&self) -> &str {
        &self.server_path
    }
}

#[async_trait]
impl RenderEngine for RemoteEngine {
    fn name(&self) -> &str {
        "remote"
    }

    async fn render_once(&self, source: &Path, format: Format, dest: &Path) -> Result<(), EngineError> {
        let text = tokio::fs::read_to_string(source).await?;
        let url = diagram_url(&self.server_path, format, &encode_diagram(&text)?);
        debug!(%url, "requesting rendered diagram");

        // The fetch writes only through this handle, never by path.
        let file = File::create(dest)?;
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || fetch(&agent, &url, file))
            .await
            .map_err(|err| EngineError::Io(io::Error::other(err)))?
    }
}

/// Compress and encode diagram text for use in a server URL.
///
/// # Errors
/// Only fails if the in-memory compressor reports an I/O error.
pub fn encode_diagram(text: &str) -> io::Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(text.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(URL_SAFE_NO_PAD.encode(compressed))
}

/// `{server}/{format}/~1{encoded}`, with exactly one `/` after the server path.
pub fn diagram_url(server_path: &str, format: Format, encoded: &str) -> String {
    format!("{}/{}/~1{encoded}", server_path.trim_end_matches('/'), format.token())
}

fn fetch(agent: &Agent, url: &str, mut file: File) -> Result<(), EngineError> {
    let response = agent.get(url).call().map_err(|err| EngineError::Http {
        url: url.to_string(),
        message: err.to_string(),
    })?;

    let mut reader = response.into_body().into_reader();
    io::copy(&mut reader, &mut file)?;
    file.sync_all()?;
    Ok(())
}
