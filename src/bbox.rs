use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug + Copy + PartialEq {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(transparent)]
pub struct BBox<F: BBoxFormat>(
    [f32; 4],
    #[serde(skip)] PhantomData<F>,
);

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.0
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(x1: f32, x2: f32, x3: f32, x4: f32) -> Self {
        BBox([x1, x2, x3, x4], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    /// Corners truncated to whole pixels, the way box coordinates leave the
    /// crate. Coordinates beyond the `i32` range saturate.
    #[inline]
    pub fn pixels(&self) -> [i32; 4] {
        [
            self.left() as i32,
            self.top() as i32,
            self.right() as i32,
            self.bottom() as i32,
        ]
    }

    /// Bottom-center of the box in whole pixels: the point where the vehicle
    /// touches the road.
    #[inline]
    pub fn bottom_center(&self) -> (i32, i32) {
        let [x1, _, x2, y2] = self.pixels();

        (((x1 as i64 + x2 as i64) / 2) as i32, y2)
    }

    /// Intersection with a `width` x `height` frame, as an integer crop
    /// region `(x, y, w, h)`. `None` when nothing of the box is left.
    pub fn crop_region(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if !self.is_finite() {
            return None;
        }

        let [x1, y1, x2, y2] = self.pixels();
        let x1 = x1.clamp(0, width as i32);
        let x2 = x2.clamp(0, width as i32);
        let y1 = y1.clamp(0, height as i32);
        let y2 = y2.clamp(0, height as i32);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottom_center_uses_truncated_corners() {
        let bbox = BBox::ltrb(10.7, 20.2, 31.9, 80.6);

        assert_eq!(bbox.pixels(), [10, 20, 31, 80]);
        assert_eq!(bbox.bottom_center(), (20, 80));
    }

    #[test]
    fn bottom_center_of_huge_boxes_does_not_overflow() {
        assert_eq!(
            BBox::ltrb(2.0e9, 0.0, 2.1e9, 10.0).bottom_center(),
            (2_050_000_000, 10)
        );
        assert_eq!(BBox::ltrb(-2.0e9, 0.0, 2.0e9, 10.0).bottom_center(), (0, 10));
        assert_eq!(
            BBox::ltrb(3.0e9, 0.0, 4.0e9, 10.0).bottom_center(),
            (i32::MAX, 10)
        );
    }

    #[test]
    fn crop_region_is_clamped_to_frame() {
        let bbox = BBox::ltrb(-5.0, 10.0, 50.0, 120.0);

        assert_eq!(bbox.crop_region(40, 100), Some((0, 10, 40, 90)));
        assert_eq!(
            BBox::ltrb(-2.0e9, 0.0, 2.0e9, 10.0).crop_region(40, 100),
            Some((0, 0, 40, 10))
        );
    }

    #[test]
    fn crop_region_outside_frame_is_none() {
        assert_eq!(BBox::ltrb(200.0, 10.0, 250.0, 40.0).crop_region(100, 100), None);
        assert_eq!(BBox::ltrb(10.0, 10.0, 10.0, 40.0).crop_region(100, 100), None);
        assert_eq!(BBox::ltrb(f32::NAN, 10.0, 20.0, 40.0).crop_region(100, 100), None);
    }
}
