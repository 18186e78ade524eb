//! HTTP(S) firmware download.
//!
//! Implements [`FirmwareSource`] with one plain GET per update.
//!
//! - **`target_os = "espidf"`**: `EspHttpConnection`, with the ESP-IDF
//!   certificate bundle attached so `https://` URLs work.
//! - **all other targets**: serves images registered with
//!   [`HttpFetcher::serve`] from memory.
//!
//! Each blocking step (send request, read response head, read a chunk) is
//! bounded by [`READ_TIMEOUT`] and preceded by a watchdog feed, so no
//! single stall can outlast the task watchdog.

use log::{debug, info, warn};

use crate::app::ports::{FetchError, FetchResponse, FirmwareSource};
use crate::drivers::watchdog::Watchdog;

#[cfg(target_os = "espidf")]
use esp_idf_svc::http::Method;
#[cfg(target_os = "espidf")]
use esp_idf_svc::http::client::{Configuration as HttpClientConfiguration, EspHttpConnection};

/// Per-operation network timeout.  Must stay below the watchdog period.
pub const READ_TIMEOUT: core::time::Duration = core::time::Duration::from_secs(8);

#[cfg(target_os = "espidf")]
pub struct HttpFetcher {
    conn: Option<EspHttpConnection>,
    watchdog: Watchdog,
}

#[cfg(target_os = "espidf")]
impl HttpFetcher {
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            conn: None,
            watchdog,
        }
    }
}

#[cfg(target_os = "espidf")]
impl FirmwareSource for HttpFetcher {
    fn open(&mut self, url: &str) -> Result<FetchResponse, FetchError> {
        self.close();

        let conf = HttpClientConfiguration {
            timeout: Some(READ_TIMEOUT),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let mut conn = EspHttpConnection::new(&conf).map_err(|e| {
            warn!("HTTP: client init failed: {:?}", e);
            FetchError::Connect
        })?;

        info!("HTTP: GET {}", url);
        self.watchdog.feed();
        conn.initiate_request(Method::Get, url, &[]).map_err(|e| {
            warn!("HTTP: request failed: {:?}", e);
            FetchError::Connect
        })?;
        self.watchdog.feed();
        conn.initiate_response().map_err(|e| {
            warn!("HTTP: no response: {:?}", e);
            FetchError::Connect
        })?;

        let status = conn.status();
        let content_length = conn
            .header("Content-Length")
            .or_else(|| conn.header("content-length"))
            .and_then(|v| v.trim().parse::<u64>().ok());
        debug!("HTTP: status {} length {:?}", status, content_length);

        self.conn = Some(conn);
        Ok(FetchResponse {
            status,
            content_length,
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FetchError> {
        let conn = self.conn.as_mut().ok_or(FetchError::Read)?;
        self.watchdog.feed();
        conn.read(buf).map_err(|e| {
            warn!("HTTP: read failed: {:?}", e);
            FetchError::Read
        })
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("HTTP: connection closed");
        }
    }
}

// ── Simulation ────────────────────────────────────────────────

/// In-memory download source.  Feeds the watchdog at the same points as
/// the hardware client.
#[cfg(not(target_os = "espidf"))]
pub struct HttpFetcher {
    images: Vec<(String, Vec<u8>)>,
    body: Option<(Vec<u8>, usize)>,
    watchdog: Watchdog,
}

#[cfg(not(target_os = "espidf"))]
impl HttpFetcher {
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            images: Vec::new(),
            body: None,
            watchdog,
        }
    }

    /// Answer GETs for `url` with `image` and an exact `Content-Length`.
    pub fn serve(&mut self, url: &str, image: Vec<u8>) {
        self.images.retain(|(u, _)| u != url);
        self.images.push((url.to_string(), image));
    }

    pub fn is_open(&self) -> bool {
        self.body.is_some()
    }
}

#[cfg(not(target_os = "espidf"))]
impl FirmwareSource for HttpFetcher {
    fn open(&mut self, url: &str) -> Result<FetchResponse, FetchError> {
        self.close();
        info!("HTTP(sim): GET {}", url);
        // Request, then response head.
        self.watchdog.feed();
        self.watchdog.feed();
        match self.images.iter().find(|(u, _)| u == url) {
            Some((_, image)) => {
                let len = image.len() as u64;
                self.body = Some((image.clone(), 0));
                Ok(FetchResponse {
                    status: 200,
                    content_length: Some(len),
                })
            }
            None => {
                self.body = Some((Vec::new(), 0));
                Ok(FetchResponse {
                    status: 404,
                    content_length: Some(0),
                })
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FetchError> {
        let (body, pos) = self.body.as_mut().ok_or(FetchError::Read)?;
        self.watchdog.feed();
        let n = buf.len().min(body.len() - *pos);
        buf[..n].copy_from_slice(&body[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }

    fn close(&mut self) {
        if self.body.take().is_some() {
            debug!("HTTP(sim): connection closed");
        }
    }
}
