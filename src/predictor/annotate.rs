use super::PredictorError;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_line_segment_mut},
    rect::Rect,
};
use serde::Deserialize;
use std::io::Cursor;

const PALETTE: [[u8; 3]; 6] = [
    [255, 0, 0],
    [255, 221, 0],
    [0, 200, 83],
    [0, 145, 234],
    [213, 0, 249],
    [255, 109, 0],
];

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct DetectionPoint {
    pub x: f32,
    pub y: f32,
}

/// One instance returned by the segmentation service. `x`/`y` is the box centre.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    #[serde(rename = "class")]
    pub class_label: String,
    #[serde(default)]
    pub points: Vec<DetectionPoint>,
}

fn color_for(label: &str) -> Rgb<u8> {
    let index = label.bytes().map(usize::from).sum::<usize>() % PALETTE.len();
    Rgb(PALETTE[index])
}

fn draw_outline(canvas: &mut RgbImage, points: &[DetectionPoint], color: Rgb<u8>) {
    let closing = points.first().map(|first| (points[points.len() - 1], *first));
    let edges = points
        .windows(2)
        .map(|pair| (pair[0], pair[1]))
        .chain(closing);

    for (a, b) in edges {
        draw_line_segment_mut(canvas, (a.x, a.y), (b.x, b.y), color);
        draw_line_segment_mut(
            canvas,
            (a.x + 1.0, a.y + 1.0),
            (b.x + 1.0, b.y + 1.0),
            color,
        );
    }
}

fn draw_box(canvas: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
    let x = (detection.x - detection.width / 2.0).round() as i32;
    let y = (detection.y - detection.height / 2.0).round() as i32;
    let width = detection.width.round().max(1.0) as u32;
    let height = detection.height.round().max(1.0) as u32;

    draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(width, height), color);
    if width > 2 && height > 2 {
        draw_hollow_rect_mut(
            canvas,
            Rect::at(x + 1, y + 1).of_size(width - 2, height - 2),
            color,
        );
    }
}

/// Draws every detection onto `image_data` and re-encodes it as JPEG.
pub fn annotate(image_data: &[u8], detections: &[Detection]) -> Result<Vec<u8>, PredictorError> {
    let mut canvas = image::load_from_memory(image_data)
        .map_err(PredictorError::Decode)?
        .to_rgb8();

    for detection in detections {
        let color = color_for(&detection.class_label);
        if detection.points.len() >= 3 {
            draw_outline(&mut canvas, &detection.points, color);
        } else {
            draw_box(&mut canvas, detection, color);
        }
    }

    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(PredictorError::Encode)?;

    Ok(buf)
}
