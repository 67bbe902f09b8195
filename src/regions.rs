//! Binary-mask cleanup and region extraction shared by the motion detector and
//! the background differencer.
//!
//! Masks are `GrayImage`s where non-zero marks a hit. Morphology uses a 3x3
//! square structuring element (`Norm::LInf`, radius 1).

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use imageproc::point::Point;

use crate::BoundingBox;

pub const MASK_ON: u8 = 255;

/// Order of the morphological passes applied before contour extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cleanup {
    /// Fill small gaps first, then drop speckle. Used on motion masks.
    CloseThenOpen,
    /// Drop speckle first, then fill gaps. Used on foreground masks.
    OpenThenClose,
}

pub fn clean_mask(mask: &GrayImage, cleanup: Cleanup) -> GrayImage {
    match cleanup {
        Cleanup::CloseThenOpen => {
            let closed = morphology::close(mask, Norm::LInf, 1);
            morphology::open(&closed, Norm::LInf, 1)
        }
        Cleanup::OpenThenClose => {
            let opened = morphology::open(mask, Norm::LInf, 1);
            morphology::close(&opened, Norm::LInf, 1)
        }
    }
}

/// An external contour that passed the area filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blob {
    pub bbox: BoundingBox,
    pub area: f64,
}

/// Outermost contours of `mask` whose enclosed area exceeds `min_area`,
/// in contour-scan order.
pub fn external_blobs(mask: &GrayImage, min_area: f64) -> Vec<Blob> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .filter_map(|contour| {
            let area = polygon_area(&contour.points);
            if area <= min_area {
                return None;
            }
            bounding_rect(&contour.points).map(|bbox| Blob { bbox, area })
        })
        .collect()
}

/// Shoelace area of a closed contour.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice.abs() as f64) / 2.0
}

fn bounding_rect(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox::new(
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with_rects(width: u32, height: u32, rects: &[BoundingBox]) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for r in rects {
            for y in r.y..r.y + r.height {
                for x in r.x..r.x + r.width {
                    mask.put_pixel(x, y, Luma([MASK_ON]));
                }
            }
        }
        mask
    }

    #[test]
    fn square_blob_reports_box_and_area() {
        let mask = mask_with_rects(40, 40, &[BoundingBox::new(10, 12, 8, 8)]);
        let blobs = external_blobs(&mask, 10.0);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].bbox, BoundingBox::new(10, 12, 8, 8));
        assert_eq!(blobs[0].area, 49.0);
    }

    #[test]
    fn small_blobs_are_filtered() {
        let mask = mask_with_rects(
            40,
            40,
            &[BoundingBox::new(2, 2, 3, 3), BoundingBox::new(20, 20, 10, 10)],
        );
        let blobs = external_blobs(&mask, 10.0);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].bbox.x, 20);
    }

    #[test]
    fn hole_does_not_create_second_region() {
        let mut mask = mask_with_rects(40, 40, &[BoundingBox::new(5, 5, 20, 20)]);
        for y in 10..15 {
            for x in 10..15 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        assert_eq!(external_blobs(&mask, 10.0).len(), 1);
    }

    #[test]
    fn open_removes_isolated_speckle() {
        let mut mask = mask_with_rects(30, 30, &[BoundingBox::new(10, 10, 8, 8)]);
        mask.put_pixel(2, 2, Luma([MASK_ON]));
        let cleaned = clean_mask(&mask, Cleanup::CloseThenOpen);
        assert_eq!(cleaned.get_pixel(2, 2).0[0], 0);
        assert_eq!(cleaned.get_pixel(13, 13).0[0], MASK_ON);
    }
}
