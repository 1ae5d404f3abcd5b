use image::{DynamicImage, RgbImage};

use crate::error::{AppError, Result};

/// One decoded image: `height x width x 3` bytes, channel order B-G-R.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    /// Position within its source (0-based).
    pub index: u64,
}

impl Frame {
    /// Wrap raw `bgr24` bytes. Fails if the buffer does not match the size.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(AppError::ImageLoad(format!(
                "bgr buffer has {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            index: 0,
        })
    }

    pub fn from_rgb_image(img: &RgbImage) -> Self {
        let (width, height) = img.dimensions();
        let mut data = img.as_raw().clone();
        swap_red_blue(&mut data);
        Self {
            width,
            height,
            data,
            index: 0,
        }
    }

    pub fn from_image(img: &DynamicImage) -> Self {
        Self::from_rgb_image(&img.to_rgb8())
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw `bgr24` bytes, row-major.
    pub fn as_bgr(&self) -> &[u8] {
        &self.data
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let mut data = self.data.clone();
        swap_red_blue(&mut data);
        // dimensions are checked on construction
        RgbImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn to_dynamic_image(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.to_rgb_image())
    }
}

fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_from_bgr_rejects_wrong_length() {
        assert!(Frame::from_bgr(2, 2, vec![0; 11]).is_err());
        assert!(Frame::from_bgr(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn test_rgb_conversion_swaps_channels() {
        let mut img = RgbImage::new(1, 1);
        img.put_pixel(0, 0, Rgb([10, 20, 30]));

        let frame = Frame::from_rgb_image(&img);
        assert_eq!(frame.as_bgr(), &[30, 20, 10]);
        assert_eq!(frame.to_rgb_image().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }
}
