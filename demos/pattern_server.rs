//! Minimal server demo: serves a static test pattern.
//!
//! Usage:
//!   cargo run --example pattern_server
//!
//! Then connect with a VNC viewer to localhost:5900.

use rfbd::{FrameSource, Server, SessionHandle, DEFAULT_PORT};

const WIDTH: u16 = 640;
const HEIGHT: u16 = 480;

struct Pattern {
    pixels: Vec<u8>,
}

impl Pattern {
    fn new() -> Self {
        let mut pixels = vec![0u8; usize::from(WIDTH) * usize::from(HEIGHT) * 4];
        for y in 0..usize::from(HEIGHT) {
            for x in 0..usize::from(WIDTH) {
                let offset = (y * usize::from(WIDTH) + x) * 4;
                // Horizontal red ramp, vertical green ramp, blue checkers.
                pixels[offset] = (x * 255 / usize::from(WIDTH)) as u8;
                pixels[offset + 1] = (y * 255 / usize::from(HEIGHT)) as u8;
                pixels[offset + 2] = if (x / 32 + y / 32) % 2 == 0 { 192 } else { 32 };
                pixels[offset + 3] = 255;
            }
        }
        Self { pixels }
    }
}

impl FrameSource for Pattern {
    fn framebuffer_rgbx32(&self) -> &[u8] {
        &self.pixels
    }

    fn width(&self) -> u16 {
        WIDTH
    }

    fn height(&self) -> u16 {
        HEIGHT
    }

    fn session_title(&self) -> String {
        "rfbd test pattern".to_string()
    }

    fn required_password(&self) -> String {
        // No authentication; see FrameSource::required_password to enable it.
        String::new()
    }
}

#[tokio::main]
async fn main() -> rfbd::Result<()> {
    env_logger::init();

    println!("Serving a test pattern on port {DEFAULT_PORT}...");
    println!("Connect with: vncviewer localhost:{DEFAULT_PORT}");

    let server = Server::new(|_handle: SessionHandle| -> Box<dyn FrameSource> {
        Box::new(Pattern::new())
    });
    server.listen(("0.0.0.0", DEFAULT_PORT)).await
}
