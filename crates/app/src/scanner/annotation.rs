//! Drawing primitives for the preview overlay.
//!
//! Scans are outlined with their bounding box and labelled with symbology
//! and payload; the most recent product lookup is summarised in a panel at
//! the bottom-left, and a frame/FPS readout sits bottom-right. The annotated
//! frame is JPEG-encoded into the `FramePacket` the preview server serves.

use anyhow::{Result, anyhow};
use image::{DynamicImage, ImageBuffer, Rgba, codecs::jpeg::JpegEncoder};

use crate::scanner::{
    data::{FramePacket, ScanSummary},
    lookup::ProductRecord,
};
use video_ingest::Frame;

/// What the product panel should show for the most recent accepted scan.
pub(crate) enum ProductPanel<'a> {
    Record(&'a ProductRecord),
    /// Lookup ran and found nothing (or was offline); `&str` is the payload.
    Unavailable(&'a str),
}

pub(crate) fn annotate_frame(
    frame: &Frame,
    frame_number: u64,
    fps: f32,
    scans: Vec<ScanSummary>,
    panel: Option<ProductPanel<'_>>,
    jpeg_quality: i32,
) -> Result<FramePacket> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let rgba = bgr_to_rgba(&frame.data);
    let mut image = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_vec(width, height, rgba)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    for scan in &scans {
        let left = scan.bbox[0].clamp(0.0, (width - 1) as f32);
        let top = scan.bbox[1].clamp(0.0, (height - 1) as f32);
        let right = scan.bbox[2].clamp(0.0, (width - 1) as f32);
        let bottom = scan.bbox[3].clamp(0.0, (height - 1) as f32);
        draw_rectangle(
            &mut image,
            left.round() as i32,
            top.round() as i32,
            right.round() as i32,
            bottom.round() as i32,
            Rgba([0, 255, 0, 255]),
        );
    }

    for scan in &scans {
        let left = scan.bbox[0].clamp(0.0, (width - 1) as f32);
        let top = scan.bbox[1].clamp(0.0, (height - 1) as f32);
        let label_text = format!("{} {}", scan.symbology.label(), scan.code);
        let label_x = left.round() as i32;
        let label_y = (top.round() as i32 - 12).max(0);
        let text_width = label_text.chars().count() as i32 * 6;
        fill_rect(
            &mut image,
            label_x,
            label_y,
            label_x + text_width,
            label_y + 8,
            Rgba([0, 0, 0, 180]),
        );
        draw_label(
            &mut image,
            label_x,
            label_y,
            &label_text,
            Rgba([0, 255, 0, 255]),
        );
    }

    if let Some(panel) = &panel {
        draw_product_panel(&mut image, panel);
    }

    let info = format!("FRAME {:06}  FPS {:4.1}", frame_number, fps);
    let info_width = (info.chars().count() as i32 * 6).min(width as i32);
    let info_x = (width as i32 - info_width - 4).max(0);
    let info_y = (height as i32 - 12).max(0);
    fill_rect(
        &mut image,
        info_x,
        info_y,
        info_x + info_width + 4,
        info_y + 8,
        Rgba([0, 0, 0, 180]),
    );
    draw_label(
        &mut image,
        info_x + 2,
        info_y,
        &info,
        Rgba([255, 255, 255, 255]),
    );

    let product = match panel {
        Some(ProductPanel::Record(record)) => Some(record.clone()),
        _ => None,
    };

    let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
    let mut buffer = Vec::new();
    let quality = jpeg_quality.clamp(1, 100) as u8;
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&rgb)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;

    Ok(FramePacket {
        jpeg: buffer,
        scans,
        product,
        timestamp_ms: frame.timestamp_ms,
        frame_number,
        fps,
    })
}

fn panel_lines(panel: &ProductPanel<'_>) -> Vec<String> {
    match panel {
        ProductPanel::Record(record) => {
            let mut lines = Vec::new();
            lines.push(
                record
                    .name
                    .clone()
                    .unwrap_or_else(|| "UNNAMED PRODUCT".to_string()),
            );
            match (&record.brand, &record.category) {
                (Some(brand), Some(category)) => lines.push(format!("{brand} - {category}")),
                (Some(brand), None) => lines.push(brand.clone()),
                (None, Some(category)) => lines.push(category.clone()),
                (None, None) => {}
            }
            if let Some(nutrition) = &record.nutrition {
                if let Some(energy) = nutrition.energy_kcal {
                    lines.push(format!("ENERGY {energy:.0} KCAL/100G"));
                }
            }
            lines.push(format!("{} VIA {}", record.code, record.source));
            lines
        }
        ProductPanel::Unavailable(code) => vec![
            code.to_string(),
            "PRODUCT INFO UNAVAILABLE".to_string(),
        ],
    }
}

fn draw_product_panel(image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>, panel: &ProductPanel<'_>) {
    let lines = panel_lines(panel);
    let height = image.height() as i32;
    let line_height = 12;
    let mut y = (height - line_height * lines.len() as i32 - 16).max(0);

    for line in &lines {
        let text_width = line.chars().count() as i32 * 6;
        fill_rect(image, 8, y, 8 + text_width + 4, y + 8, Rgba([0, 0, 0, 180]));
        draw_label(image, 10, y, line, Rgba([255, 255, 0, 255]));
        y += line_height;
    }
}

fn bgr_to_rgba(input: &[u8]) -> Vec<u8> {
    let pixels = input.len() / 3;
    let mut output = Vec::with_capacity(pixels * 4);
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
        output.push(255);
    }
    output
}

fn draw_rectangle(
    image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgba<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for x in left..=right {
        if top >= 0 && top < height {
            *image.get_pixel_mut(x as u32, top as u32) = color;
        }
        if bottom >= 0 && bottom < height {
            *image.get_pixel_mut(x as u32, bottom as u32) = color;
        }
    }
    for y in top..=bottom {
        if left >= 0 && left < width {
            *image.get_pixel_mut(left as u32, y as u32) = color;
        }
        if right >= 0 && right < width {
            *image.get_pixel_mut(right as u32, y as u32) = color;
        }
    }
}

fn fill_rect(
    image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgba<u8>,
) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(
    image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>,
    mut x: i32,
    y: i32,
    text: &str,
    color: Rgba<u8>,
) {
    let height = image.height() as i32;
    let baseline = y;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = baseline + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col as i32;
                        if px >= 0 && px < image.width() as i32 {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
            x += 6;
        } else {
            x += 6;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'B' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'D' => Some([
            0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'G' => Some([
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'I' => Some([
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        'J' => Some([
            0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100,
        ]),
        'K' => Some([
            0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'Q' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'U' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'V' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100,
        ]),
        'W' => Some([
            0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010,
        ]),
        'X' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001,
        ]),
        'Y' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'Z' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        '-' => Some([0, 0, 0, 0b01110, 0, 0, 0]),
        ':' => Some([0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0]),
        '/' => Some([
            0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000,
        ]),
        '?' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_alphabet_covers_symbology_labels() {
        use scan_core::Symbology;
        for symbology in [
            Symbology::Ean8,
            Symbology::Ean13,
            Symbology::UpcA,
            Symbology::UpcE,
            Symbology::Code39,
            Symbology::Code93,
            Symbology::Code128,
            Symbology::Itf,
            Symbology::Codabar,
            Symbology::QrCode,
            Symbology::DataMatrix,
            Symbology::Pdf417,
            Symbology::Aztec,
            Symbology::Other,
        ] {
            for ch in symbology.label().chars() {
                assert!(
                    glyph_bits(ch).is_some(),
                    "missing glyph for {ch:?} in {symbology}"
                );
            }
        }
    }

    #[test]
    fn panel_lines_for_full_record() {
        let record = ProductRecord {
            code: "3017620422003".to_string(),
            name: Some("Nutella".to_string()),
            brand: Some("Ferrero".to_string()),
            category: Some("Spreads".to_string()),
            origin: None,
            description: None,
            ingredients: None,
            nutrition: Some(crate::scanner::lookup::Nutrition {
                energy_kcal: Some(539.0),
                fat_g: None,
                carbs_g: None,
                protein_g: None,
            }),
            source: "openfoodfacts".to_string(),
        };
        let lines = panel_lines(&ProductPanel::Record(&record));
        assert_eq!(lines[0], "Nutella");
        assert_eq!(lines[1], "Ferrero - Spreads");
        assert_eq!(lines[2], "ENERGY 539 KCAL/100G");
        assert_eq!(lines[3], "3017620422003 VIA openfoodfacts");
    }

    #[test]
    fn panel_lines_for_missing_product() {
        let lines = panel_lines(&ProductPanel::Unavailable("012345678905"));
        assert_eq!(lines[0], "012345678905");
        assert_eq!(lines[1], "PRODUCT INFO UNAVAILABLE");
    }
}
