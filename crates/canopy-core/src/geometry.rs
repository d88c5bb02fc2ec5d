//! Planar vector geometry for region boundaries, tile footprints and sample
//! points. Coordinates are in the layer's projected units (metres for the
//! target coordinate systems this pipeline is used with).

use rand::Rng;

use crate::error::{CanopyError, Result};

/// Rejection-sampling attempts per requested point before giving up.
const MAX_ATTEMPTS_PER_POINT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Closed-interval overlap test; touching extents overlap.
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }

    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let e = Extent {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        };
        (e.xmin < e.xmax && e.ymin < e.ymax).then_some(e)
    }

    fn of_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Extent> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut e = Extent::new(first.x, first.y, first.x, first.y);
        for p in iter {
            e.xmin = e.xmin.min(p.x);
            e.ymin = e.ymin.min(p.y);
            e.xmax = e.xmax.max(p.x);
            e.ymax = e.ymax.max(p.y);
        }
        Some(e)
    }
}

/// A polygon with one exterior ring and any number of holes. Rings may be
/// open or closed; the closing edge is implied.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>, holes: Vec<Vec<Point>>) -> Result<Self> {
        if exterior.len() < 3 || holes.iter().any(|h| h.len() < 3) {
            return Err(CanopyError::Geometry(
                "polygon ring needs at least three vertices".into(),
            ));
        }
        Ok(Self { exterior, holes })
    }

    /// Axis-aligned rectangle, counter-clockwise.
    pub fn rectangle(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            exterior: vec![
                Point::new(xmin, ymin),
                Point::new(xmax, ymin),
                Point::new(xmax, ymax),
                Point::new(xmin, ymax),
            ],
            holes: Vec::new(),
        }
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Point>> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }

    pub fn area(&self) -> f64 {
        let outer = ring_area(&self.exterior).abs();
        let holes: f64 = self.holes.iter().map(|h| ring_area(h).abs()).sum();
        outer - holes
    }

    /// Even-odd crossing test over all rings.
    ///
    /// The crossing rule is half-open: a point lying on an edge shared by two
    /// adjacent polygons is inside exactly one of them.
    pub fn contains(&self, p: Point) -> bool {
        self.rings().filter(|r| ring_crossings(r, p) % 2 == 1).count() % 2 == 1
    }
}

/// One or more polygons treated as a single area feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub polygons: Vec<Polygon>,
}

impl Shape {
    pub fn new(polygons: Vec<Polygon>) -> Result<Self> {
        if polygons.is_empty() {
            return Err(CanopyError::Geometry("shape has no polygons".into()));
        }
        Ok(Self { polygons })
    }

    pub fn rectangle(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self { polygons: vec![Polygon::rectangle(xmin, ymin, xmax, ymax)] }
    }

    pub fn extent(&self) -> Extent {
        let points = self.polygons.iter().flat_map(|p| p.exterior.iter());
        // `new` guarantees at least one ring of three vertices.
        Extent::of_points(points).unwrap_or(Extent::new(0.0, 0.0, 0.0, 0.0))
    }

    pub fn area(&self) -> f64 {
        self.polygons.iter().map(Polygon::area).sum()
    }

    pub fn contains(&self, p: Point) -> bool {
        self.polygons.iter().any(|poly| poly.contains(p))
    }

    /// True when the two shapes share any point, boundaries included.
    pub fn intersects(&self, other: &Shape) -> bool {
        if !self.extent().overlaps(&other.extent()) {
            return false;
        }
        self.polygons
            .iter()
            .any(|a| other.polygons.iter().any(|b| polygons_intersect(a, b)))
    }

    /// Draw `count` uniformly distributed points inside the shape.
    pub fn random_points<R: Rng>(&self, count: usize, rng: &mut R) -> Result<Vec<Point>> {
        let e = self.extent();
        if e.width() <= 0.0 || e.height() <= 0.0 {
            return Err(CanopyError::Geometry("cannot sample a degenerate shape".into()));
        }
        let mut points = Vec::with_capacity(count);
        let budget = count.saturating_mul(MAX_ATTEMPTS_PER_POINT);
        let mut attempts = 0usize;
        while points.len() < count {
            if attempts >= budget {
                return Err(CanopyError::Geometry(format!(
                    "gave up after {attempts} attempts with {} of {count} points",
                    points.len()
                )));
            }
            attempts += 1;
            let p = Point::new(
                rng.gen_range(e.xmin..e.xmax),
                rng.gen_range(e.ymin..e.ymax),
            );
            if self.contains(p) {
                points.push(p);
            }
        }
        Ok(points)
    }
}

// ── Ring and segment helpers ─────────────────────────────────────────────────

fn ring_edges(ring: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

/// Signed shoelace area; positive for counter-clockwise rings.
fn ring_area(ring: &[Point]) -> f64 {
    ring_edges(ring).map(|(a, b)| a.x * b.y - b.x * a.y).sum::<f64>() / 2.0
}

fn ring_crossings(ring: &[Point], p: Point) -> usize {
    ring_edges(ring)
        .filter(|(a, b)| {
            (a.y > p.y) != (b.y > p.y) && p.x < a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y)
        })
        .count()
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Closed segment intersection, collinear overlap and touching included.
fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

fn polygons_intersect(a: &Polygon, b: &Polygon) -> bool {
    let ea = Extent::of_points(&a.exterior);
    let eb = Extent::of_points(&b.exterior);
    if let (Some(ea), Some(eb)) = (ea, eb) {
        if !ea.overlaps(&eb) {
            return false;
        }
    }
    for ra in a.rings() {
        for (a1, a2) in ring_edges(ra) {
            for rb in b.rings() {
                if ring_edges(rb).any(|(b1, b2)| segments_intersect(a1, a2, b1, b2)) {
                    return true;
                }
            }
        }
    }
    // No boundary contact: either disjoint or one lies wholly inside the other.
    b.contains(a.exterior[0]) || a.contains(b.exterior[0])
}
