use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::RgbImage;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use super::AnnotateConfigs;
use super::annotate_utils::{clamp_box, rect_intersect};
use super::color::{get_class_color, get_text_color};
use crate::model::Detections;

/// Draw detection boxes and their labels
pub fn draw_detections(
    img: &mut RgbImage,
    detections: &Detections,
    configs: &AnnotateConfigs,
    font: Option<&FontRef>,
) {
    let show_box = configs.show_box;
    let show_label = configs.show_label && show_box;
    let show_conf = configs.show_conf && show_label;

    if !show_box || detections.is_empty() {
        return;
    }

    let (width, height) = img.dimensions();

    // Calculate dynamic scale factor based on image size (reference 640x640)
    let max_dim = width.max(height) as f32;
    let scale_factor = (max_dim / 640.0).max(1.0);

    // Scale thickness and font size
    let thickness = (2.0 * scale_factor).round().max(1.0) as i32;
    let font_scale = (11.0 * scale_factor).max(10.0); // Min font size 10

    // Keep track of occupied label areas to avoid overlap
    let mut labels_rects: Vec<Rect> = Vec::new();

    for det in detections.iter() {
        let Some((x1, y1, x2, y2)) = clamp_box(det.xyxy, width, height) else {
            continue;
        };

        let color = get_class_color(det.class_id);

        for t in 0..thickness {
            let tx1 = (x1 + t).min(x2);
            let ty1 = (y1 + t).min(y2);
            let tx2 = (x2 - t).max(tx1);
            let ty2 = (y2 - t).max(ty1);
            if tx2 > tx1 && ty2 > ty1 {
                let rect = Rect::at(tx1, ty1).of_size((tx2 - tx1) as u32, (ty2 - ty1) as u32);
                draw_hollow_rect_mut(img, rect, color);
            }
        }

        if !show_label {
            continue;
        }
        let Some(f) = font else {
            continue;
        };

        let label = if show_conf {
            format!("{} {:.2}", det.class_name, det.confidence)
        } else {
            det.class_name.clone()
        };

        let scale = PxScale::from(font_scale);
        let scaled_font = f.as_scaled(scale);
        let text_w: f32 = label
            .chars()
            .map(|c| scaled_font.h_advance(scaled_font.glyph_id(c)))
            .sum();
        let text_w = text_w.ceil() as i32;
        let text_h = scale.y.ceil() as i32;

        // Default: above the box, pulled inside the image when it would leave it
        let mut text_x = x1.max(0);
        let mut text_y = y1 - text_h;
        if text_y < 0 {
            text_y = y1;
        }
        if text_x + text_w >= width as i32 {
            text_x = width as i32 - text_w - 1;
        }
        if text_y + text_h >= height as i32 {
            text_y = height as i32 - text_h - 1;
        }

        // Overlap avoidance: stack below existing labels, then shift right
        let max_attempts = 10;
        let mut current_rect = Rect::at(text_x, text_y).of_size(text_w as u32, text_h as u32);
        for _ in 0..max_attempts {
            if !labels_rects.iter().any(|r| rect_intersect(&current_rect, r)) {
                break;
            }

            text_y += text_h;
            if text_y + text_h >= height as i32 {
                text_y = (y1 - text_h).max(0);
                text_x += 10;
                if text_x + text_w >= width as i32 {
                    break;
                }
            }
            current_rect = Rect::at(text_x, text_y).of_size(text_w as u32, text_h as u32);
        }

        labels_rects.push(current_rect);

        if text_x >= 0
            && text_y >= 0
            && text_x + text_w < width as i32
            && text_y + text_h < height as i32
        {
            draw_filled_rect_mut(img, current_rect, color);
            let text_color = get_text_color(color);
            draw_text_mut(img, text_color, text_x, text_y, scale, f, &label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Detection;
    use image::Rgb;

    #[test]
    fn test_box_outline_drawn_without_font() {
        let mut img = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let dets = Detections::new(vec![Detection {
            xyxy: [10.0, 10.0, 40.0, 40.0],
            class_id: 0,
            class_name: "cracked".to_string(),
            confidence: 0.9,
        }]);

        draw_detections(&mut img, &dets, &AnnotateConfigs::default(), None);

        assert_eq!(img.get_pixel(10, 10), &get_class_color(0));
        // interior untouched
        assert_eq!(img.get_pixel(25, 25), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_show_box_false_draws_nothing() {
        let mut img = RgbImage::from_pixel(32, 32, Rgb([7, 7, 7]));
        let original = img.clone();
        let dets = Detections::new(vec![Detection {
            xyxy: [2.0, 2.0, 20.0, 20.0],
            class_id: 1,
            class_name: "snow".to_string(),
            confidence: 0.8,
        }]);
        let configs = AnnotateConfigs {
            show_box: false,
            ..Default::default()
        };

        draw_detections(&mut img, &dets, &configs, None);
        assert_eq!(img, original);
    }
}
