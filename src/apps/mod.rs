//! Applications built on the pipeline language, and the image files the
//! command-line harnesses read and write.

pub mod nl_means;

pub use nl_means::{NlMeans, ScheduleStyle};

use crate::buffer::Buffer;
use crate::ir::types::Type;
use crate::utils::errors::{FlowResult, RuntimeError, RuntimeErrorKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// A float image stored as JSON.
///
/// `data` is in storage order: x varies fastest, then y, then channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl ImageFile {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self { width, height, channels, data: vec![0.0; width * height * channels] }
    }

    pub fn load(path: impl AsRef<Path>) -> FlowResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let image: ImageFile =
            serde_json::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if image.data.len() != image.width * image.height * image.channels {
            return Err(RuntimeError::new(
                RuntimeErrorKind::BadBuffer,
                format!(
                    "{}x{}x{} image carries {} values",
                    image.width,
                    image.height,
                    image.channels,
                    image.data.len()
                ),
            )
            .with_subject(path.as_ref().display().to_string())
            .into());
        }
        Ok(image)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> FlowResult<()> {
        let json = serde_json::to_string(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// A float32 buffer of extents `[width, height, channels]`.
    pub fn to_buffer(&self) -> FlowResult<Buffer> {
        Buffer::from_vec(self.data.clone(), &[self.width, self.height, self.channels])
    }

    /// Copy a three-dimensional float32 buffer out into an image.
    pub fn from_buffer(buffer: &Buffer) -> FlowResult<Self> {
        buffer.check_shape("image", Type::float(32), 3)?;
        Ok(Self {
            width: buffer.width() as usize,
            height: buffer.height() as usize,
            channels: buffer.channels() as usize,
            data: buffer.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::FlowError;

    #[test]
    fn test_image_file_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.json");
        let mut image = ImageFile::new(2, 2, 3);
        image.data[5] = 0.5;
        image.save(&path).unwrap();
        let back = ImageFile::load(&path).unwrap();
        assert_eq!(back, image);
        let buffer = back.to_buffer().unwrap();
        assert_eq!(buffer.extent(2), 3);
        assert_eq!(ImageFile::from_buffer(&buffer).unwrap(), image);
    }

    #[test]
    fn test_truncated_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"width":2,"height":2,"channels":3,"data":[0.0]}"#).unwrap();
        assert!(ImageFile::load(&path).unwrap_err().is_runtime());
        fs::write(&path, "not json").unwrap();
        assert!(matches!(ImageFile::load(&path), Err(FlowError::Io(_))));
    }
}
