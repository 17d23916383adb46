/// Fixtures shared by unit tests
use crate::acquire::RemoteFetch;
use crate::error::AcquireError;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Fresh, empty directory under the system temp dir.
pub fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "point-sprite-unit-{}-{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

pub fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// Answers one HTTP request on a loopback port with `response` verbatim.
/// Returns the URL to request.
pub fn serve_once(response: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&chunk[..n]),
            }
        }
        let _ = stream.write_all(&response);
    });
    format!("http://{}/image.png", addr)
}

/// Blocking client that ignores proxy settings, for loopback servers.
pub fn local_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// In-memory fetcher: known URLs return their body, others 404.
pub struct StaticFetcher {
    responses: Option<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn serving(responses: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            responses: Some(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every request fails at the transport level.
    pub fn failing() -> Self {
        Self {
            responses: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteFetch for StaticFetcher {
    fn fetch_into(&self, url: &str, buf: &mut Vec<u8>) -> Result<(), AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(responses) = &self.responses else {
            return Err(AcquireError::Http {
                url: url.to_string(),
                message: "network unreachable".to_string(),
            });
        };
        match responses.get(url) {
            Some(body) => {
                buf.extend_from_slice(body);
                Ok(())
            }
            None => Err(AcquireError::HttpStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
