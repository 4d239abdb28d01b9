use super::{FrameSource, SourceError};
use common::sources::SourceDescriptor;
use image::RgbImage;

/// A single decoded image returned by every read; never runs out
pub struct StillImageSource {
    descriptor: SourceDescriptor,
    frame: RgbImage,
}

impl StillImageSource {
    pub fn open(descriptor: SourceDescriptor) -> Result<Self, SourceError> {
        let frame = image::open(&descriptor.locator)
            .map_err(|e| SourceError::unavailable(&descriptor.locator, e))?
            .to_rgb8();
        Ok(Self::from_image(descriptor, frame))
    }

    pub fn from_image(descriptor: SourceDescriptor, frame: RgbImage) -> Self {
        Self { descriptor, frame }
    }
}

impl FrameSource for StillImageSource {
    fn read(&mut self) -> Result<RgbImage, SourceError> {
        Ok(self.frame.clone())
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_replays_the_same_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.png");
        let mut image = RgbImage::new(16, 8);
        image.put_pixel(3, 4, Rgb([10, 200, 30]));
        image.save(&path).unwrap();

        let mut source =
            StillImageSource::open(SourceDescriptor::static_image(path.to_string_lossy())).unwrap();
        for _ in 0..100 {
            let frame = source.read().unwrap();
            assert_eq!(frame.dimensions(), (16, 8));
            assert_eq!(frame.get_pixel(3, 4), &Rgb([10, 200, 30]));
        }
    }

    #[test]
    fn test_corrupt_image_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let result = StillImageSource::open(SourceDescriptor::static_image(path.to_string_lossy()));
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
    }
}
