//! Integer geometry used by surface and region state

/// An axis-aligned rectangle in surface-local coordinates
///
/// A rectangle with a non-positive width or height is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Rect {
    /// Create a rectangle from its position and size
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Rect {
        Rect { x, y, width, height }
    }

    /// Whether this rectangle covers no area
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Exclusive right edge
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// The size of this rectangle
    pub fn size(&self) -> Size {
        Size { width: self.width, height: self.height }
    }

    /// Whether the point `(x, y)` lies inside this rectangle
    pub fn contains(&self, x: i32, y: i32) -> bool {
        !self.is_empty() && x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Whether the two rectangles share some area
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    // pushes the parts of `self` not covered by `cut`
    fn subtract_into(&self, cut: &Rect, out: &mut Vec<Rect>) {
        if !self.intersects(cut) {
            out.push(*self);
            return;
        }
        if cut.y > self.y {
            out.push(Rect::new(self.x, self.y, self.width, cut.y - self.y));
        }
        if cut.bottom() < self.bottom() {
            out.push(Rect::new(self.x, cut.bottom(), self.width, self.bottom() - cut.bottom()));
        }
        let top = self.y.max(cut.y);
        let bottom = self.bottom().min(cut.bottom());
        if cut.x > self.x {
            out.push(Rect::new(self.x, top, cut.x - self.x, bottom - top));
        }
        if cut.right() < self.right() {
            out.push(Rect::new(cut.right(), top, self.right() - cut.right(), bottom - top));
        }
    }
}

/// A width and height pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Size {
    /// Create a size
    pub const fn new(width: i32, height: i32) -> Size {
        Size { width, height }
    }

    /// Whether either dimension is non-positive
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// A set of pixels, described as a union of rectangles
///
/// The rectangles are kept in a canonical y-x banded form: the region is cut into horizontal
/// bands, each band holds sorted non-touching spans, and vertically adjacent bands with identical
/// spans are coalesced. Two regions covering the same pixels therefore compare equal no matter
/// which sequence of operations built them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RectRegion {
    rects: Vec<Rect>,
}

impl RectRegion {
    /// An empty region
    pub fn new() -> RectRegion {
        RectRegion { rects: Vec::new() }
    }

    /// Whether the region covers nothing
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// The canonical rectangles making up this region
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// The smallest rectangle containing the whole region
    pub fn bounding_rect(&self) -> Rect {
        let mut iter = self.rects.iter();
        let Some(first) = iter.next() else {
            return Rect::default();
        };
        let (mut left, mut top, mut right, mut bottom) =
            (first.x, first.y, first.right(), first.bottom());
        for rect in iter {
            left = left.min(rect.x);
            top = top.min(rect.y);
            right = right.max(rect.right());
            bottom = bottom.max(rect.bottom());
        }
        Rect::new(left, top, right - left, bottom - top)
    }

    /// Whether the point `(x, y)` is part of the region
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|rect| rect.contains(x, y))
    }

    /// Add a rectangle to the region
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pieces = std::mem::take(&mut self.rects);
        pieces.push(rect);
        self.rects = normalize(&pieces);
    }

    /// Remove a rectangle from the region
    pub fn subtract(&mut self, cut: Rect) {
        if cut.is_empty() || !self.rects.iter().any(|rect| rect.intersects(&cut)) {
            return;
        }
        let mut pieces = Vec::with_capacity(self.rects.len() + 4);
        for rect in &self.rects {
            rect.subtract_into(&cut, &mut pieces);
        }
        self.rects = normalize(&pieces);
    }

    /// The union of this region and another one
    pub fn united(&self, other: &RectRegion) -> RectRegion {
        let pieces: Vec<Rect> = self.rects.iter().chain(other.rects.iter()).copied().collect();
        RectRegion { rects: normalize(&pieces) }
    }
}

impl From<Rect> for RectRegion {
    fn from(rect: Rect) -> RectRegion {
        let mut region = RectRegion::new();
        region.add(rect);
        region
    }
}

impl FromIterator<Rect> for RectRegion {
    fn from_iter<T: IntoIterator<Item = Rect>>(iter: T) -> RectRegion {
        let pieces: Vec<Rect> = iter.into_iter().collect();
        RectRegion { rects: normalize(&pieces) }
    }
}

fn normalize(pieces: &[Rect]) -> Vec<Rect> {
    let pieces: Vec<Rect> = pieces.iter().copied().filter(|rect| !rect.is_empty()).collect();
    let mut edges: Vec<i32> = pieces.iter().flat_map(|rect| [rect.y, rect.bottom()]).collect();
    edges.sort_unstable();
    edges.dedup();

    let mut out: Vec<Rect> = Vec::new();
    // bottom edge, spans and first index in `out` of the band currently open for coalescing
    let mut open: Option<(i32, Vec<(i32, i32)>, usize)> = None;

    for band in edges.windows(2) {
        let (top, bottom) = (band[0], band[1]);
        let mut spans: Vec<(i32, i32)> = pieces
            .iter()
            .filter(|rect| rect.y <= top && rect.bottom() >= bottom)
            .map(|rect| (rect.x, rect.right()))
            .collect();
        spans.sort_unstable();

        let mut merged: Vec<(i32, i32)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        if merged.is_empty() {
            open = None;
            continue;
        }

        let coalesce = matches!(
            &open,
            Some((open_bottom, open_spans, _)) if *open_bottom == top && *open_spans == merged
        );
        if coalesce {
            if let Some((open_bottom, _, first)) = open.as_mut() {
                for rect in &mut out[*first..] {
                    rect.height = bottom - rect.y;
                }
                *open_bottom = bottom;
            }
        } else {
            let first = out.len();
            let height = bottom - top;
            out.extend(
                merged.iter().map(|&(start, end)| Rect::new(start, top, end - start, height)),
            );
            open = Some((bottom, merged, first));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rects_are_ignored() {
        let mut region = RectRegion::new();
        region.add(Rect::new(5, 5, 0, 10));
        region.add(Rect::new(5, 5, 10, -1));
        assert!(region.is_empty());
        assert_eq!(region.bounding_rect(), Rect::default());
    }

    #[test]
    fn union_is_canonical() {
        let mut a = RectRegion::new();
        a.add(Rect::new(0, 0, 10, 10));
        a.add(Rect::new(5, 5, 10, 10));

        let mut b = RectRegion::new();
        b.add(Rect::new(5, 5, 10, 10));
        b.add(Rect::new(0, 0, 10, 10));
        b.add(Rect::new(2, 2, 3, 3));

        assert_eq!(a, b);
        assert_eq!(
            a.rects(),
            &[Rect::new(0, 0, 10, 5), Rect::new(0, 5, 15, 5), Rect::new(5, 10, 10, 5)]
        );
        assert_eq!(a.bounding_rect(), Rect::new(0, 0, 15, 15));
    }

    #[test]
    fn adjacent_rects_merge() {
        let region: RectRegion =
            [Rect::new(0, 0, 10, 10), Rect::new(10, 0, 10, 10), Rect::new(0, 10, 20, 5)]
                .into_iter()
                .collect();
        assert_eq!(region.rects(), &[Rect::new(0, 0, 20, 15)]);
    }

    #[test]
    fn subtract_hole() {
        let mut region = RectRegion::from(Rect::new(0, 0, 30, 30));
        region.subtract(Rect::new(10, 10, 10, 10));
        assert!(!region.contains(15, 15));
        assert!(region.contains(5, 15));
        assert!(region.contains(25, 15));
        assert_eq!(
            region.rects(),
            &[
                Rect::new(0, 0, 30, 10),
                Rect::new(0, 10, 10, 10),
                Rect::new(20, 10, 10, 10),
                Rect::new(0, 20, 30, 10),
            ]
        );

        region.add(Rect::new(10, 10, 10, 10));
        assert_eq!(region, RectRegion::from(Rect::new(0, 0, 30, 30)));
    }

    #[test]
    fn subtract_everything() {
        let mut region = RectRegion::from(Rect::new(0, 10, 20, 30));
        region.subtract(Rect::new(-5, -5, 100, 100));
        assert!(region.is_empty());
    }

    #[test]
    fn united() {
        let a = RectRegion::from(Rect::new(0, 0, 5, 5));
        let b = RectRegion::from(Rect::new(0, 5, 5, 5));
        assert_eq!(a.united(&b), RectRegion::from(Rect::new(0, 0, 5, 10)));
    }
}
