//! DevTools HTTP endpoint: target listing and creation.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use seekpilot_core::{Error, Result};

use crate::channel::CdpChannel;

/// One entry of `/json/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

impl Target {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

/// Client for a browser's DevTools HTTP endpoint.
#[derive(Debug, Clone)]
pub struct DevTools {
    base_url: String,
    http: Client,
}

impl DevTools {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /json/list`.
    pub async fn list_targets(&self) -> Result<Vec<Target>> {
        let url = format!("{}/json/list", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Target(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Target(format!("{} returned {}", url, response.status())));
        }
        let targets: Vec<Target> = response
            .json()
            .await
            .map_err(|e| Error::Target(format!("bad /json/list payload: {}", e)))?;
        debug!("DevTools lists {} targets", targets.len());
        Ok(targets)
    }

    /// `PUT /json/new?<url>`: open a new tab on `url`.
    pub async fn open_target(&self, url: &str) -> Result<Target> {
        let endpoint = format!("{}/json/new?{}", self.base_url, url);
        let response = self
            .http
            .put(&endpoint)
            .send()
            .await
            .map_err(|e| Error::Target(format!("{}: {}", endpoint, e)))?;
        if !response.status().is_success() {
            return Err(Error::Target(format!(
                "{} returned {}",
                endpoint,
                response.status()
            )));
        }
        let target: Target = response
            .json()
            .await
            .map_err(|e| Error::Target(format!("bad /json/new payload: {}", e)))?;
        info!("Opened new tab {} on {}", target.id, target.url);
        Ok(target)
    }

    /// Reuse a page already on the host of `url`, or open one.
    pub async fn ensure_target(&self, url: &str) -> Result<Target> {
        let targets = self.list_targets().await?;
        if let Some(existing) = find_page(&targets, url) {
            debug!("Reusing tab {} ({})", existing.id, existing.url);
            return Ok(existing.clone());
        }
        self.open_target(url).await
    }

    /// Find or open a page on `url` and connect a channel to it.
    pub async fn attach(&self, url: &str, call_timeout: Duration) -> Result<(Target, CdpChannel)> {
        let target = self.ensure_target(url).await?;
        let ws_url = target
            .web_socket_debugger_url
            .clone()
            .ok_or_else(|| Error::Target(format!("tab {} has no debugger url", target.id)))?;
        let channel = CdpChannel::connect(&ws_url, call_timeout).await?;
        Ok((target, channel))
    }
}

/// Host portion of a URL, without scheme, path or port.
pub fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    authority.split(':').next().unwrap_or(authority)
}

/// First debuggable page target whose URL is on the same host as `url`.
pub fn find_page<'a>(targets: &'a [Target], url: &str) -> Option<&'a Target> {
    let host = host_of(url);
    if host.is_empty() {
        return None;
    }
    targets
        .iter()
        .filter(|t| t.is_page() && t.web_socket_debugger_url.is_some())
        .find(|t| host_of(&t.url) == host)
}
