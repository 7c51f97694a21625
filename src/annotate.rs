//! Frame decoration: restricted-area mask, boxes with labels, alert banner
//! and the network FPS counter.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::{Banner, UniqueBox, ZoneState};

pub const WARNING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const CLEAR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const FPS_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

const BOX_FONT_SIZE: f32 = 10.0;
const BANNER_FONT_SIZE: f32 = 20.0;
const FPS_FONT_SIZE: f32 = 14.0;
const BANNER_OFFSET_X: i32 = 60;

/// Draws annotations onto frames. Text needs a TrueType font; without one
/// only shapes are drawn.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| match load_font(path) {
            Ok(font) => Some(font),
            Err(err) => {
                log::warn!("font unavailable, text annotations disabled: {:#}", err);
                None
            }
        });
        if font_path.is_none() {
            log::warn!("no font configured, text annotations disabled");
        }
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn text(&self, image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, size: f32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y, PxScale::from(size), font, text);
        }
    }

    /// Outline each box with its label. `zones` pairs with `boxes` by index.
    pub fn draw_detections(
        &self,
        image: &mut RgbImage,
        boxes: &[UniqueBox],
        zones: &[ZoneState],
        trigger_class_id: usize,
        class_name: impl Fn(usize) -> String,
    ) {
        for (unique, zone) in boxes.iter().zip(zones) {
            let color = if unique.class_id == trigger_class_id {
                WARNING_COLOR
            } else {
                CLEAR_COLOR
            };
            let bbox = unique.bbox;
            let rect = Rect::at(bbox.x.round() as i32, bbox.y.round() as i32).of_size(
                (bbox.w.round() as u32).max(1),
                (bbox.h.round() as u32).max(1),
            );
            draw_hollow_rect_mut(image, rect, color);

            let label = box_label(unique, zone, trigger_class_id, &class_name(unique.class_id));
            self.text(
                image,
                color,
                bbox.x as i32,
                bbox.y as i32,
                BOX_FONT_SIZE,
                &label,
            );
        }
    }

    pub fn draw_banner(&self, image: &mut RgbImage, banner: Banner) {
        let color = match banner {
            Banner::Warning => WARNING_COLOR,
            Banner::Clear => CLEAR_COLOR,
        };
        let x = (image.width() / 2) as i32 + BANNER_OFFSET_X;
        self.text(image, color, x, 0, BANNER_FONT_SIZE, banner.text());
    }

    /// Network-only frame rate in the lower-left corner.
    pub fn draw_fps(&self, image: &mut RgbImage, fps: f32) {
        let y = image.height() as i32 - FPS_FONT_SIZE as i32 - 5;
        self.text(image, FPS_COLOR, 10, y, FPS_FONT_SIZE, &format!("FPS: {:.1}", fps));
    }

    /// Top class and probability for classification models.
    pub fn draw_classification(&self, image: &mut RgbImage, class_name: &str, probability: f32) {
        let text = format!("{}: {:.3}", class_name, probability);
        self.text(image, CLEAR_COLOR, 10, 5, BANNER_FONT_SIZE, &text);
    }
}

fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let bytes = std::fs::read(path)
        .map_err(|err| anyhow::anyhow!("read font {}: {}", path.display(), err))?;
    FontVec::try_from_vec(bytes)
        .map_err(|err| anyhow::anyhow!("parse font {}: {}", path.display(), err))
}

/// Blend the right half of the frame toward red.
pub fn mask_restricted_area(image: &mut RgbImage) {
    const MASK: [f32; 3] = [255.0, 1.0, 1.0];
    let (width, height) = image.dimensions();
    for y in 0..height {
        for x in width / 2..width {
            let pixel = image.get_pixel_mut(x, y);
            for (channel, mask) in pixel.0.iter_mut().zip(MASK) {
                let blended = 0.5 * *channel as f32 + 0.5 * mask + 1.0;
                *channel = blended.round().min(255.0) as u8;
            }
        }
    }
}

/// `[NG]` only for a trigger-class box inside the restricted area.
pub fn box_label(
    unique: &UniqueBox,
    zone: &ZoneState,
    trigger_class_id: usize,
    class_name: &str,
) -> String {
    let prefix = if zone.safe || zone.class_id != trigger_class_id {
        "[OK]"
    } else {
        "[NG]"
    };
    format!("{} {}: {:.3}", prefix, class_name, unique.score)
}
