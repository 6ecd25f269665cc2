//! Pairing token broker and artifact rendering.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Luma};
use parking_lot::RwLock;
use qrcode::render::unicode;
use qrcode::QrCode;
use thiserror::Error;

use pairlink_core::PairingToken;

/// Errors that can occur while rendering a pairing artifact.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to encode pairing token: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("Failed to produce image: {0}")]
    Image(#[from] image::ImageError),
}

impl From<RenderError> for pairlink_core::Error {
    fn from(e: RenderError) -> Self {
        pairlink_core::Error::Render(e.to_string())
    }
}

/// Requested rendering of a pairing token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// Block characters for a terminal
    Terminal,
    /// PNG bytes
    Png,
    /// `data:image/png;base64,...`
    DataUrl,
}

/// A rendered pairing token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Terminal(String),
    Png(Vec<u8>),
    DataUrl(String),
}

/// Render `token` as a scannable code.
///
/// Deterministic in `token`, `format` and `size`. `size` is the minimum
/// edge length in pixels for raster formats and is ignored for the
/// terminal rendering.
pub fn render_artifact(
    token: &PairingToken,
    format: ArtifactFormat,
    size: u32,
) -> Result<Artifact, RenderError> {
    let code = QrCode::new(token.as_str().as_bytes())?;

    match format {
        ArtifactFormat::Terminal => {
            let text = code
                .render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Light)
                .light_color(unicode::Dense1x2::Dark)
                .quiet_zone(true)
                .build();
            Ok(Artifact::Terminal(text))
        }
        ArtifactFormat::Png => Ok(Artifact::Png(png_bytes(&code, size)?)),
        ArtifactFormat::DataUrl => {
            let png = png_bytes(&code, size)?;
            Ok(Artifact::DataUrl(format!(
                "data:image/png;base64,{}",
                STANDARD.encode(png)
            )))
        }
    }
}

fn png_bytes(code: &QrCode, size: u32) -> Result<Vec<u8>, RenderError> {
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(size, size)
        .build();
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Holds the latest pairing token.
///
/// Older tokens are discarded on `set`; concurrent setters are
/// last-write-wins.
#[derive(Debug)]
pub struct PairingBroker {
    latest: RwLock<Option<PairingToken>>,
    image_size: u32,
}

impl PairingBroker {
    pub fn new(image_size: u32) -> Self {
        Self {
            latest: RwLock::new(None),
            image_size,
        }
    }

    pub fn set(&self, token: PairingToken) {
        *self.latest.write() = Some(token);
    }

    pub fn get(&self) -> Option<PairingToken> {
        self.latest.read().clone()
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Render the latest token, or `None` when there is none.
    pub fn render(&self, format: ArtifactFormat) -> Option<Result<Artifact, RenderError>> {
        self.get()
            .map(|token| render_artifact(&token, format, self.image_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn test_broker_keeps_only_latest() {
        let broker = PairingBroker::new(128);
        assert!(broker.get().is_none());

        broker.set(PairingToken::new("T1"));
        broker.set(PairingToken::new("T2"));
        assert_eq!(broker.get(), Some(PairingToken::new("T2")));

        broker.clear();
        assert!(broker.get().is_none());
        assert!(broker.render(ArtifactFormat::Png).is_none());
    }

    #[test]
    fn test_png_rendering() {
        let artifact = render_artifact(&PairingToken::new("T1"), ArtifactFormat::Png, 200).unwrap();
        match artifact {
            Artifact::Png(bytes) => assert!(bytes.starts_with(PNG_MAGIC)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_png_respects_minimum_size() {
        let Artifact::Png(bytes) =
            render_artifact(&PairingToken::new("T1"), ArtifactFormat::Png, 300).unwrap()
        else {
            panic!("expected png");
        };
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.width() >= 300);
        assert!(decoded.height() >= 300);
    }

    #[test]
    fn test_data_url_rendering() {
        let artifact =
            render_artifact(&PairingToken::new("T1"), ArtifactFormat::DataUrl, 64).unwrap();
        match artifact {
            Artifact::DataUrl(url) => {
                let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
                let bytes = STANDARD.decode(encoded).unwrap();
                assert!(bytes.starts_with(PNG_MAGIC));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_terminal_rendering() {
        let artifact =
            render_artifact(&PairingToken::new("T1"), ArtifactFormat::Terminal, 0).unwrap();
        match artifact {
            Artifact::Terminal(text) => {
                assert!(text.lines().count() > 5);
                assert!(text.contains('█') || text.contains('▀') || text.contains('▄'));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let token = PairingToken::new("2@abcdef,ghijk");
        let a = render_artifact(&token, ArtifactFormat::DataUrl, 128).unwrap();
        let b = render_artifact(&token, ArtifactFormat::DataUrl, 128).unwrap();
        assert_eq!(a, b);
    }
}
