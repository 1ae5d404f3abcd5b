// -- submodules
mod annotate_utils;
mod color;
mod detection;
mod font;

use detection::draw_detections;
use font::{is_ascii, load_font};
use serde::Deserialize;
use std::sync::OnceLock;

// -- external imports
use crate::error::Result;
use crate::frame::Frame;
use crate::model::{Detections, Detector};
use ab_glyph::FontRef;
use image::RgbImage;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotateConfigs {
    /// whether to draw on a blank image
    pub on_blank: bool,

    /// whether to show boxes
    pub show_box: bool,

    /// whether to show class labels
    pub show_label: bool,

    /// whether to show confidence scores
    pub show_conf: bool,

    /// load a unicode-capable font for non-ASCII class names
    pub unicode_font: bool,
}

impl Default for AnnotateConfigs {
    fn default() -> Self {
        Self {
            on_blank: false,
            show_box: true,
            show_label: true,
            show_conf: true,
            unicode_font: false,
        }
    }
}

/// Frame Annotator: runs the detector and renders its boxes onto a copy of the frame.
#[derive(Debug, Clone)]
pub struct Annotator {
    configs: AnnotateConfigs,
    font_data: Option<Vec<u8>>,
    /// Unicode-capable font, loaded on the first non-ASCII class name
    unicode_font_data: OnceLock<Option<Vec<u8>>>,
}

const ASCII_FONT: &str = "Arial.ttf";
const UNICODE_FONT: &str = "Arial.Unicode.ttf";

impl Annotator {
    /// Build an annotator, loading the label font once if labels are shown.
    pub fn new(configs: AnnotateConfigs) -> Self {
        if !(configs.show_box && configs.show_label) {
            return Self::with_font(configs, None);
        }
        if configs.unicode_font {
            let font_data = load_font(UNICODE_FONT);
            return Self::with_font(configs, font_data);
        }
        Self {
            font_data: load_font(ASCII_FONT),
            unicode_font_data: OnceLock::new(),
            configs,
        }
    }

    /// Use `font_data` for every label, ASCII or not.
    pub fn with_font(configs: AnnotateConfigs, font_data: Option<Vec<u8>>) -> Self {
        Self {
            unicode_font_data: OnceLock::from(font_data.clone()),
            configs,
            font_data,
        }
    }

    pub fn configs(&self) -> &AnnotateConfigs {
        &self.configs
    }

    /// Predict on `frame` at `conf` and return a freshly annotated frame.
    ///
    /// The input frame is left untouched; model failures propagate.
    pub fn annotate(&self, detector: &dyn Detector, conf: f32, frame: &Frame) -> Result<Frame> {
        let detections = detector.predict(frame, conf)?;
        Ok(self.render(frame, &detections))
    }

    /// Render already computed detections onto a copy of `frame`.
    pub fn render(&self, frame: &Frame, detections: &Detections) -> Frame {
        let mut annotated = if self.configs.on_blank {
            RgbImage::new(frame.width(), frame.height())
        } else {
            frame.to_rgb_image()
        };

        let font = self
            .label_font_data(detections)
            .and_then(|data| FontRef::try_from_slice(data).ok());

        draw_detections(&mut annotated, detections, &self.configs, font.as_ref());

        Frame::from_rgb_image(&annotated).with_index(frame.index)
    }

    fn label_font_data(&self, detections: &Detections) -> Option<&[u8]> {
        if needs_unicode_font(&self.configs, detections) {
            let unicode = self
                .unicode_font_data
                .get_or_init(|| load_font(UNICODE_FONT))
                .as_deref();
            return unicode.or(self.font_data.as_deref());
        }
        self.font_data.as_deref()
    }
}

/// Whether the labels about to be drawn need more than an ASCII font.
fn needs_unicode_font(configs: &AnnotateConfigs, detections: &Detections) -> bool {
    configs.show_box && configs.show_label && detections.iter().any(|d| !is_ascii(&d.class_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Detection;
    use image::Rgb;

    struct FixedDetector(Detections);

    impl Detector for FixedDetector {
        fn predict(&self, _frame: &Frame, conf: f32) -> Result<Detections> {
            Ok(self.0.clone().above(conf))
        }
    }

    fn gray_frame() -> Frame {
        Frame::from_rgb_image(&RgbImage::from_pixel(48, 32, Rgb([90, 120, 150]))).with_index(7)
    }

    fn no_font() -> Annotator {
        Annotator::with_font(AnnotateConfigs::default(), None)
    }

    #[test]
    fn test_zero_detections_returns_identical_frame() {
        let frame = gray_frame();
        let detector = FixedDetector(Detections::default());

        let annotated = no_font().annotate(&detector, 0.25, &frame).unwrap();
        assert_eq!(annotated, frame);
    }

    #[test]
    fn test_annotation_does_not_mutate_input() {
        let frame = gray_frame();
        let before = frame.clone();
        let detector = FixedDetector(Detections::new(vec![Detection {
            xyxy: [4.0, 4.0, 30.0, 20.0],
            class_id: 2,
            class_name: "bird-drop".to_string(),
            confidence: 0.7,
        }]));

        let annotated = no_font().annotate(&detector, 0.25, &frame).unwrap();
        assert_eq!(frame, before);
        assert_ne!(annotated, frame);
        assert_eq!(annotated.index, 7);
    }

    #[test]
    fn test_non_ascii_class_names_switch_to_unicode_font() {
        let ascii = Detections::new(vec![Detection {
            xyxy: [0.0, 0.0, 4.0, 4.0],
            class_id: 0,
            class_name: "Clean".to_string(),
            confidence: 0.9,
        }]);
        let unicode = Detections::new(vec![Detection {
            xyxy: [0.0, 0.0, 4.0, 4.0],
            class_id: 1,
            class_name: "積雪".to_string(),
            confidence: 0.9,
        }]);
        let configs = AnnotateConfigs::default();

        assert!(!needs_unicode_font(&configs, &ascii));
        assert!(needs_unicode_font(&configs, &unicode));
        let no_labels = AnnotateConfigs {
            show_label: false,
            ..Default::default()
        };
        assert!(!needs_unicode_font(&no_labels, &unicode));

        let annotator = Annotator {
            configs,
            font_data: Some(vec![1]),
            unicode_font_data: OnceLock::from(Some(vec![2])),
        };
        assert_eq!(annotator.label_font_data(&ascii), Some(&[1u8][..]));
        assert_eq!(annotator.label_font_data(&unicode), Some(&[2u8][..]));
    }

    #[test]
    fn test_on_blank_starts_from_black() {
        let frame = gray_frame();
        let annotator = Annotator::with_font(
            AnnotateConfigs {
                on_blank: true,
                ..Default::default()
            },
            None,
        );
        let annotated = annotator.render(&frame, &Detections::default());
        assert!(annotated.as_bgr().iter().all(|&b| b == 0));
    }
}
