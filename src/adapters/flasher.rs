//! Firmware flasher adapter.
//!
//! Implements [`FirmwareFlasher`] on top of [`ImageWriter`]: an image is
//! either downloaded over plain HTTP or read from an MQTT byte stream, and
//! written chunk by chunk into the inactive OTA partition.
//!
//! HTTP result mapping:
//!
//! | Response                     | Result                         |
//! |------------------------------|--------------------------------|
//! | 200 with `Content-Length`    | flashed → `Ok`                 |
//! | 304 Not Modified             | `NoUpdates`                    |
//! | other status                 | `Failed(HttpStatus(code))`     |
//! | missing/zero length          | `Failed(InvalidSize)`          |
//!
//! On ESP-IDF the download uses `esp_idf_svc::http::client`; on hosts a
//! minimal HTTP/1.1 GET over `std::net`.

use log::{info, warn};

use crate::app::ports::{ByteSource, FirmwareFlasher, HttpUpdateResult};
use crate::error::UpdateError;
use crate::ota::image::{ImageState, ImageWriter};

const CHUNK_SIZE: usize = 1024;
const HTTP_NOT_MODIFIED: u16 = 304;
const HTTP_OK: u16 = 200;

/// Copy exactly `len` bytes from `read` into a fresh image and finalize it.
fn write_image<F>(writer: &mut ImageWriter, len: usize, mut read: F) -> Result<(), UpdateError>
where
    F: FnMut(&mut [u8]) -> Result<usize, UpdateError>,
{
    writer.begin(len)?;
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut written = 0;
    while written < len {
        let want = (len - written).min(CHUNK_SIZE);
        let n = match read(&mut chunk[..want]) {
            Ok(0) => {
                warn!("OTA: source ended at {} of {} bytes", written, len);
                writer.abort();
                return Err(UpdateError::Incomplete);
            }
            Ok(n) => n,
            Err(e) => {
                writer.abort();
                return Err(e);
            }
        };
        if let Err(e) = writer.write(&chunk[..n]) {
            writer.abort();
            return Err(e.into());
        }
        written += n;
    }
    writer.finalize()?;
    Ok(())
}

pub struct PartitionFlasher {
    writer: ImageWriter,
    user_agent: String,
    #[cfg(not(target_os = "espidf"))]
    restarts: usize,
}

impl PartitionFlasher {
    pub fn new(user_agent: &str) -> Self {
        Self {
            writer: ImageWriter::new(),
            user_agent: user_agent.to_owned(),
            #[cfg(not(target_os = "espidf"))]
            restarts: 0,
        }
    }

    pub fn image_state(&self) -> ImageState {
        self.writer.state()
    }

    fn report(&self, result: Result<(), UpdateError>) -> HttpUpdateResult {
        match result {
            Ok(()) => HttpUpdateResult::Ok,
            Err(UpdateError::HttpStatus(HTTP_NOT_MODIFIED)) => HttpUpdateResult::NoUpdates,
            Err(e) => HttpUpdateResult::Failed(e),
        }
    }

    // ── Platform-specific download ────────────────────────────

    #[cfg(target_os = "espidf")]
    fn download(&mut self, url: &str) -> Result<(), UpdateError> {
        use esp_idf_svc::http::Method;
        use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

        let mut conn = EspHttpConnection::new(&Configuration {
            buffer_size: Some(CHUNK_SIZE * 4),
            timeout: Some(core::time::Duration::from_secs(30)),
            ..Default::default()
        })
        .map_err(|_| UpdateError::DownloadFailed)?;

        let full = format!("http://{url}");
        conn.initiate_request(Method::Get, &full, &[("User-Agent", self.user_agent.as_str())])
            .map_err(|e| {
                warn!("OTA: request to {} failed: {}", full, e);
                UpdateError::DownloadFailed
            })?;
        conn.initiate_response()
            .map_err(|_| UpdateError::DownloadFailed)?;

        let status = conn.status();
        if status != HTTP_OK {
            return Err(UpdateError::HttpStatus(status));
        }
        let len: usize = conn
            .header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n| n > 0)
            .ok_or(UpdateError::InvalidSize)?;

        info!("OTA: downloading {} bytes", len);
        write_image(&mut self.writer, len, |buf| {
            conn.read(buf).map_err(|_| UpdateError::DownloadFailed)
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn download(&mut self, url: &str) -> Result<(), UpdateError> {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpStream;

        use super::utils::split_host_port;

        let (authority, path) = match url.find('/') {
            Some(i) => (&url[..i], &url[i..]),
            None => (url, "/"),
        };
        let (host, port) = split_host_port(authority, 80);

        let mut stream = TcpStream::connect((host, port)).map_err(|e| {
            warn!("OTA(sim): cannot reach {}:{}: {}", host, port, e);
            UpdateError::DownloadFailed
        })?;
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {}\r\nConnection: close\r\n\r\n",
            self.user_agent
        )
        .map_err(|_| UpdateError::DownloadFailed)?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|_| UpdateError::DownloadFailed)?;
        let status: u16 = line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or(UpdateError::DownloadFailed)?;

        let mut len = None;
        loop {
            line.clear();
            reader
                .read_line(&mut line)
                .map_err(|_| UpdateError::DownloadFailed)?;
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    len = value.trim().parse::<usize>().ok();
                }
            }
        }

        if status != HTTP_OK {
            return Err(UpdateError::HttpStatus(status));
        }
        let len = len.filter(|&n| n > 0).ok_or(UpdateError::InvalidSize)?;

        info!("OTA(sim): downloading {} bytes", len);
        write_image(&mut self.writer, len, |buf| {
            reader.read(buf).map_err(|_| UpdateError::DownloadFailed)
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl PartitionFlasher {
    /// The last image written (host builds keep it in memory).
    pub fn image(&self) -> &[u8] {
        self.writer.image()
    }

    pub fn restart_count(&self) -> usize {
        self.restarts
    }
}

impl FirmwareFlasher for PartitionFlasher {
    fn update_from_url(&mut self, url: &str) -> HttpUpdateResult {
        let result = self.download(url);
        if let Err(e) = result {
            warn!("OTA: {} not flashed: {}", url, e);
        }
        self.report(result)
    }

    fn flash_stream(&mut self, source: &mut dyn ByteSource, len: usize) -> Result<(), UpdateError> {
        write_image(&mut self.writer, len, |buf| {
            source.read(buf).map_err(|_| UpdateError::DownloadFailed)
        })
    }

    #[cfg(target_os = "espidf")]
    fn restart(&mut self) {
        info!("OTA: restarting into new image");
        esp_idf_hal::reset::restart();
    }

    #[cfg(not(target_os = "espidf"))]
    fn restart(&mut self) {
        self.restarts += 1;
        info!("OTA(sim): restart requested");
    }
}
