//! Coordinate primitives shared by the detection and matching stages.
//!
//! Three coordinate spaces meet here:
//!
//! - model-input pixel space: the fixed square frame the network sees
//!   (`MODEL_INPUT_SIZE` on a side),
//! - normalized image space: `0..1` on both axes, as reported by the
//!   external region detector,
//! - screen pixel space: the viewport the overlay is drawn into.
//!
//! Everything in this module is pure. No state, no allocation beyond the
//! returned values.

use serde::{Deserialize, Serialize};

/// Side length of the square model-input frame, in pixels.
pub const MODEL_INPUT_SIZE: f32 = 416.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle stored as origin + size.
///
/// A rectangle with negative width or height is treated as its standardized
/// equivalent by every method here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from a center point and size.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Smallest rectangle enclosing all points.
    pub fn bounding(points: &[Point]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn min_x(&self) -> f32 {
        self.x.min(self.x + self.width)
    }

    pub fn min_y(&self) -> f32 {
        self.y.min(self.y + self.height)
    }

    pub fn max_x(&self) -> f32 {
        self.x.max(self.x + self.width)
    }

    pub fn max_y(&self) -> f32 {
        self.y.max(self.y + self.height)
    }

    pub fn area(&self) -> f32 {
        (self.width * self.height).abs()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0.0 || self.height == 0.0
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min_x(), self.min_y()),
            Point::new(self.max_x(), self.min_y()),
            Point::new(self.min_x(), self.max_y()),
            Point::new(self.max_x(), self.max_y()),
        ]
    }

    /// Overlapping region of two rectangles, or `None` when they are disjoint
    /// or only touch along an edge.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.min_x().max(other.min_x());
        let y1 = self.min_y().max(other.min_y());
        let x2 = self.max_x().min(other.max_x());
        let y2 = self.max_y().min(other.max_y());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// Intersection area over union area, in `[0, 1]`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let Some(inter) = self.intersection(other) else {
            return 0.0;
        };
        let inter_area = inter.area();
        let union = self.area() + other.area() - inter_area;
        if union > 0.0 {
            inter_area / union
        } else {
            0.0
        }
    }

    /// Map a normalized (`0..1`) rectangle to pixel space.
    pub fn to_pixels(&self, width: f32, height: f32) -> Rect {
        Rect::new(
            self.x * width,
            self.y * height,
            self.width * width,
            self.height * height,
        )
    }

    /// Map a pixel-space rectangle to normalized (`0..1`) space.
    pub fn to_normalized(&self, width: f32, height: f32) -> Rect {
        if width == 0.0 || height == 0.0 {
            return Rect::default();
        }
        Rect::new(
            self.x / width,
            self.y / height,
            self.width / width,
            self.height / height,
        )
    }

    /// Bounding rectangle of this rectangle's corners after `transform`.
    pub fn apply(&self, transform: &AffineTransform) -> Rect {
        let corners = self.corners().map(|p| transform.apply_point(p));
        Rect::bounding(&corners)
    }
}

/// Four corners of a detected quadrilateral, normalized to `0..1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_left: Point,
    pub bottom_right: Point,
}

impl Quad {
    /// Axis-aligned quad covering `rect`.
    pub fn from_rect(rect: &Rect) -> Quad {
        let [top_left, top_right, bottom_left, bottom_right] = rect.corners();
        Quad {
            top_left,
            top_right,
            bottom_left,
            bottom_right,
        }
    }

    pub fn points(&self) -> [Point; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }

    /// Axis-aligned bounding box in normalized space.
    pub fn bounding_box(&self) -> Rect {
        Rect::bounding(&self.points())
    }

    /// Corners scaled to a `width` x `height` pixel buffer.
    pub fn to_pixels(&self, width: f32, height: f32) -> Quad {
        let scale = |p: Point| Point::new(p.x * width, p.y * height);
        Quad {
            top_left: scale(self.top_left),
            top_right: scale(self.top_right),
            bottom_left: scale(self.bottom_left),
            bottom_right: scale(self.bottom_right),
        }
    }
}

/// 2-D affine transform: `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Interface orientation used when correcting the display transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    pub fn apply_point(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.tx,
            self.b * p.x + self.d * p.y + self.ty,
        )
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            tx: self.tx * other.a + self.ty * other.c + other.tx,
            ty: self.tx * other.b + self.ty * other.d + other.ty,
        }
    }

    /// Inverse transform, or `None` when the matrix is singular.
    pub fn invert(&self) -> Option<AffineTransform> {
        let det = self.a * self.d - self.b * self.c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(AffineTransform {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }

    /// Normalized-image to viewport transform for a camera image of
    /// `image_resolution` shown aspect-fill in `viewport`.
    ///
    /// The overflowing axis is centred. Portrait swaps the image axes and
    /// flips Y; landscape flips X.
    pub fn display_corrected(
        image_resolution: Size,
        viewport: Size,
        orientation: Orientation,
    ) -> AffineTransform {
        let (resolution, flip_x, flip_y) = match orientation {
            Orientation::LandscapeLeft | Orientation::LandscapeRight => {
                (image_resolution, true, false)
            }
            Orientation::Portrait | Orientation::PortraitUpsideDown => (
                Size::new(image_resolution.height, image_resolution.width),
                false,
                true,
            ),
        };

        let (mut width, mut height, mut translate_x, mut translate_y);
        if resolution.width / resolution.height > viewport.width / viewport.height {
            height = viewport.height;
            width = resolution.width / resolution.height * viewport.height;
            translate_x = (viewport.width - width) / 2.0;
            translate_y = 0.0;
        } else {
            width = viewport.width;
            height = resolution.height / resolution.width * viewport.width;
            translate_x = 0.0;
            translate_y = (viewport.height - height) / 2.0;
        }

        if flip_y {
            translate_y += height;
            height = -height;
        }
        if flip_x {
            translate_x += width;
            width = -width;
        }

        AffineTransform::scale(width, height)
            .concat(&AffineTransform::translation(translate_x, translate_y))
    }
}

/// Maps the square model-input frame onto a 4:3 viewport centred vertically
/// in the screen bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelViewport {
    pub input_size: f32,
}

impl Default for ModelViewport {
    fn default() -> Self {
        Self {
            input_size: MODEL_INPUT_SIZE,
        }
    }
}

impl ModelViewport {
    pub fn new(input_size: f32) -> Self {
        Self { input_size }
    }

    /// Move `rect` from model-input pixels into screen pixels.
    pub fn to_screen(&self, rect: &Rect, screen_bounds: &Rect) -> Rect {
        let width = screen_bounds.width;
        let height = width * 4.0 / 3.0;
        let scale_x = width / self.input_size;
        let scale_y = height / self.input_size;
        let top = (screen_bounds.height - height) / 2.0;

        Rect::new(
            rect.x * scale_x,
            rect.y * scale_y + top,
            rect.width * scale_x,
            rect.height * scale_y,
        )
    }
}
