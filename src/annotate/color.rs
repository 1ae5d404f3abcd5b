use image::Rgb;

/// Ultralytics default class palette.
const PALETTE: [[u8; 3]; 20] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

pub fn get_class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Black or white, whichever reads better on `background`.
pub fn get_text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
    if luma > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_color_wraps() {
        assert_eq!(get_class_color(0), get_class_color(PALETTE.len()));
    }

    #[test]
    fn test_text_color_contrast() {
        assert_eq!(get_text_color(Rgb([255, 255, 255])), Rgb([0, 0, 0]));
        assert_eq!(get_text_color(Rgb([0, 24, 236])), Rgb([255, 255, 255]));
    }
}
