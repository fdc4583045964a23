//! Collision Shapes
//!
//! A single tagged [`Shape`] enum covers every collision geometry the
//! engine supports, dispatched through a small capability surface:
//! [`Shape::child_count`], [`Shape::compute_aabb`], [`Shape::compute_mass`]
//! and [`Shape::ray_cast`]. No shape-kind switches leak outside this
//! module.
//!
//! # Shapes
//!
//! - **Circle**: offset center + radius
//! - **Polygon**: convex, CCW, at most [`MAX_POLYGON_VERTICES`] vertices
//! - **Edge**: a single line segment
//! - **Chain**: a polyline; each segment is one child
//! - **TileGrid**: a cell grid referencing convex hulls from a shared
//!   [`HullSet`] — one child per cell, built for large tilemap worlds
//!
//! Multi-child shapes (chain, tile grid) get one broad-phase proxy per
//! child; the `child` argument selects the segment or cell.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PhysicsError;
use crate::math::{cross, Aabb, Transform2, Vec2};

/// Maximum vertex count for convex polygons (and grid hulls).
pub const MAX_POLYGON_VERTICES: usize = 8;

/// Sentinel for a grid cell with no hull assigned.
pub const EMPTY_CELL: u32 = u32::MAX;

/// Mass, center of mass and rotational inertia of a shape at a density.
#[derive(Clone, Copy, Debug, Default)]
pub struct MassData {
    /// Mass in kg
    pub mass: f32,
    /// Center of mass in shape-local coordinates
    pub center: Vec2,
    /// Rotational inertia about the local origin
    pub inertia: f32,
}

/// Ray-cast query against a single shape child.
#[derive(Clone, Copy, Debug)]
pub struct RayCastInput {
    /// Segment start
    pub p1: Vec2,
    /// Segment end
    pub p2: Vec2,
    /// Fraction of the segment to consider (1.0 = full segment)
    pub max_fraction: f32,
}

/// A shape-level ray-cast hit.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    /// Fraction along the segment where the hit occurred
    pub fraction: f32,
    /// Surface normal at the hit point (world space)
    pub normal: Vec2,
}

// ============================================================================
// Circle
// ============================================================================

/// Circle with a local-space center offset.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CircleData {
    pub center: Vec2,
    pub radius: f32,
}

// ============================================================================
// Polygon
// ============================================================================

/// Convex polygon with precomputed edge normals and centroid.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PolygonData {
    pub vertices: [Vec2; MAX_POLYGON_VERTICES],
    pub normals: [Vec2; MAX_POLYGON_VERTICES],
    pub centroid: Vec2,
    pub count: usize,
}

impl PolygonData {
    /// Build from CCW vertices. Rejects degenerate vertex sets (fewer than
    /// three points, too many points, or near-zero area).
    pub fn new(points: &[Vec2]) -> Result<Self, PhysicsError> {
        if points.len() < 3 || points.len() > MAX_POLYGON_VERTICES {
            return Err(PhysicsError::InvalidRequest {
                reason: "polygon must have 3 to 8 vertices",
            });
        }
        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        vertices[..points.len()].copy_from_slice(points);
        let count = points.len();

        let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        for i in 0..count {
            let edge = vertices[(i + 1) % count] - vertices[i];
            if edge.length_squared() < 1e-10 {
                return Err(PhysicsError::InvalidRequest {
                    reason: "polygon has a zero-length edge",
                });
            }
            normals[i] = Vec2::new(edge.y, -edge.x).normalize();
        }

        let centroid = Self::compute_centroid(&vertices[..count])?;
        Ok(Self {
            vertices,
            normals,
            centroid,
            count,
        })
    }

    /// Axis-aligned box centered on the local origin.
    pub fn as_box(half_width: f32, half_height: f32) -> Result<Self, PhysicsError> {
        if half_width <= 0.0 || half_height <= 0.0 {
            return Err(PhysicsError::InvalidRequest {
                reason: "box half-extents must be positive",
            });
        }
        Self::new(&[
            Vec2::new(-half_width, -half_height),
            Vec2::new(half_width, -half_height),
            Vec2::new(half_width, half_height),
            Vec2::new(-half_width, half_height),
        ])
    }

    fn compute_centroid(vs: &[Vec2]) -> Result<Vec2, PhysicsError> {
        let mut c = Vec2::ZERO;
        let mut area = 0.0_f32;
        let reference = vs[0];
        for i in 1..vs.len() - 1 {
            let e1 = vs[i] - reference;
            let e2 = vs[i + 1] - reference;
            let a = 0.5 * cross(e1, e2);
            area += a;
            c += a * (e1 + e2) / 3.0;
        }
        if area < 1e-9 {
            return Err(PhysicsError::InvalidRequest {
                reason: "degenerate polygon (zero or negative area)",
            });
        }
        Ok(reference + c / area)
    }

    /// Vertices slice of the active count.
    #[inline]
    #[must_use]
    pub fn verts(&self) -> &[Vec2] {
        &self.vertices[..self.count]
    }

    /// Mirror in-place by the given axis signs, keeping CCW winding.
    fn flip(&mut self, horizontal: f32, vertical: f32) {
        let f = Vec2::new(horizontal, vertical);
        self.centroid *= f;
        for v in &mut self.vertices[..self.count] {
            *v *= f;
        }
        // Mirroring reverses winding; restore CCW
        self.vertices[..self.count].reverse();
        for i in 0..self.count {
            let edge = self.vertices[(i + 1) % self.count] - self.vertices[i];
            self.normals[i] = Vec2::new(edge.y, -edge.x).normalize();
        }
    }
}

// ============================================================================
// Edge / Chain
// ============================================================================

/// A single line segment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EdgeData {
    pub v1: Vec2,
    pub v2: Vec2,
}

/// Polyline; child `i` is the segment `vertices[i] -> vertices[i + 1]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainData {
    pub vertices: Vec<Vec2>,
}

impl ChainData {
    pub fn new(vertices: Vec<Vec2>) -> Result<Self, PhysicsError> {
        if vertices.len() < 2 {
            return Err(PhysicsError::InvalidRequest {
                reason: "chain needs at least two vertices",
            });
        }
        Ok(Self { vertices })
    }

    #[inline]
    fn segment(&self, child: usize) -> EdgeData {
        EdgeData {
            v1: self.vertices[child],
            v2: self.vertices[child + 1],
        }
    }
}

// ============================================================================
// TileGrid
// ============================================================================

/// A convex hull inside a [`HullSet`]: a range of the shared vertex pool.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Hull {
    pub index: u32,
    pub count: u32,
}

/// Shared pool of convex hulls referenced by tile-grid cells.
///
/// Vertices live in a virtual unit cell space (±0.5) and are scaled by
/// the grid's cell dimensions when a cell polygon is materialized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HullSet {
    pub vertices: Vec<Vec2>,
    pub hulls: Vec<Hull>,
}

impl HullSet {
    pub fn new(vertices: Vec<Vec2>, hulls: Vec<Hull>) -> Result<Self, PhysicsError> {
        for hull in &hulls {
            let end = hull.index as usize + hull.count as usize;
            if end > vertices.len() || hull.count < 3 || hull.count as usize > MAX_POLYGON_VERTICES
            {
                return Err(PhysicsError::InvalidRequest {
                    reason: "hull range outside vertex pool or invalid vertex count",
                });
            }
        }
        Ok(Self { vertices, hulls })
    }
}

/// Per-cell state: assigned hull plus mirror flags.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GridCell {
    pub hull: u32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Default for GridCell {
    fn default() -> Self {
        Self {
            hull: EMPTY_CELL,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

/// Cell-based collision hull lookup for large tilemap worlds.
///
/// One child per cell; the grid is centered on `position`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileGridData {
    pub hull_set: Arc<HullSet>,
    pub position: Vec2,
    pub cell_width: f32,
    pub cell_height: f32,
    pub row_count: usize,
    pub column_count: usize,
    pub cells: Vec<GridCell>,
    pub enabled: bool,
}

impl TileGridData {
    pub fn new(
        hull_set: Arc<HullSet>,
        position: Vec2,
        cell_width: f32,
        cell_height: f32,
        row_count: usize,
        column_count: usize,
    ) -> Result<Self, PhysicsError> {
        if row_count == 0 || column_count == 0 || cell_width <= 0.0 || cell_height <= 0.0 {
            return Err(PhysicsError::InvalidRequest {
                reason: "tile grid needs positive cell dimensions and counts",
            });
        }
        Ok(Self {
            hull_set,
            position,
            cell_width,
            cell_height,
            row_count,
            column_count,
            cells: vec![GridCell::default(); row_count * column_count],
            enabled: true,
        })
    }

    /// Center of a cell in shape-local coordinates.
    #[inline]
    #[must_use]
    pub fn cell_center(&self, row: usize, column: usize) -> Vec2 {
        let half_w = 0.5 * self.column_count as f32 * self.cell_width;
        let half_h = 0.5 * self.row_count as f32 * self.cell_height;
        self.position
            + Vec2::new(
                (column as f32 + 0.5) * self.cell_width - half_w,
                (row as f32 + 0.5) * self.cell_height - half_h,
            )
    }

    /// Child index of a cell.
    #[inline]
    #[must_use]
    pub fn child_of(&self, row: usize, column: usize) -> usize {
        row * self.column_count + column
    }

    /// Materialize the convex polygon for a cell, or `None` if the cell is
    /// empty or the grid is disabled.
    #[must_use]
    pub fn cell_polygon(&self, child: usize) -> Option<PolygonData> {
        if !self.enabled {
            return None;
        }
        let cell = self.cells.get(child)?;
        if cell.hull == EMPTY_CELL {
            return None;
        }
        let hull = self.hull_set.hulls.get(cell.hull as usize)?;
        let row = child / self.column_count;
        let column = child % self.column_count;
        let center = self.cell_center(row, column);
        let sx = if cell.flip_horizontal { -1.0 } else { 1.0 };
        let sy = if cell.flip_vertical { -1.0 } else { 1.0 };

        let range = hull.index as usize..(hull.index + hull.count) as usize;
        let mut points: Vec<Vec2> = self.hull_set.vertices[range]
            .iter()
            .map(|v| center + Vec2::new(v.x * self.cell_width * sx, v.y * self.cell_height * sy))
            .collect();
        // A single mirror reverses winding
        if (sx < 0.0) != (sy < 0.0) {
            points.reverse();
        }
        PolygonData::new(&points).ok()
    }

    /// Bounding box of a cell regardless of its hull content.
    #[must_use]
    pub fn cell_aabb(&self, child: usize, xf: &Transform2) -> Aabb {
        let row = child / self.column_count;
        let column = child % self.column_count;
        let center = xf.apply(self.cell_center(row, column));
        let half = 0.5 * Vec2::new(self.cell_width, self.cell_height);
        // Rotation-safe: cover the cell's circumscribed circle
        let r = half.length();
        Aabb::new(center - Vec2::splat(r), center + Vec2::splat(r))
    }
}

// ============================================================================
// Shape — the tagged variant
// ============================================================================

/// A collision shape in body-local coordinates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Shape {
    Circle(CircleData),
    Polygon(PolygonData),
    Edge(EdgeData),
    Chain(ChainData),
    TileGrid(TileGridData),
}

impl Shape {
    /// Circle with a radius, centered on the body origin.
    pub fn circle(radius: f32) -> Result<Self, PhysicsError> {
        if radius <= 0.0 {
            return Err(PhysicsError::InvalidRequest {
                reason: "circle radius must be positive",
            });
        }
        Ok(Shape::Circle(CircleData {
            center: Vec2::ZERO,
            radius,
        }))
    }

    /// Axis-aligned box from half extents.
    pub fn box_shape(half_width: f32, half_height: f32) -> Result<Self, PhysicsError> {
        Ok(Shape::Polygon(PolygonData::as_box(half_width, half_height)?))
    }

    /// Convex polygon from CCW vertices.
    pub fn polygon(points: &[Vec2]) -> Result<Self, PhysicsError> {
        Ok(Shape::Polygon(PolygonData::new(points)?))
    }

    /// Surface radius used by the contact solver: circles carry their
    /// radius, polygonal shapes are sharp.
    #[inline]
    #[must_use]
    pub fn surface_radius(&self) -> f32 {
        match self {
            Shape::Circle(c) => c.radius,
            _ => 0.0,
        }
    }

    /// Number of shape children (proxies the broad-phase needs).
    #[must_use]
    pub fn child_count(&self) -> usize {
        match self {
            Shape::Circle(_) | Shape::Polygon(_) | Shape::Edge(_) => 1,
            Shape::Chain(chain) => chain.vertices.len() - 1,
            Shape::TileGrid(grid) => grid.row_count * grid.column_count,
        }
    }

    /// World-space bounding box of one child under a transform.
    #[must_use]
    pub fn compute_aabb(&self, xf: &Transform2, child: usize) -> Aabb {
        match self {
            Shape::Circle(c) => {
                let p = xf.apply(c.center);
                let r = Vec2::splat(c.radius);
                Aabb::new(p - r, p + r)
            }
            Shape::Polygon(poly) => points_aabb(poly.verts(), xf),
            Shape::Edge(edge) => points_aabb(&[edge.v1, edge.v2], xf),
            Shape::Chain(chain) => {
                let seg = chain.segment(child.min(chain.vertices.len() - 2));
                points_aabb(&[seg.v1, seg.v2], xf)
            }
            Shape::TileGrid(grid) => grid.cell_aabb(child, xf),
        }
    }

    /// Mass properties at the given density. Edges, chains and grids carry
    /// no mass (they are meant for static world geometry).
    #[must_use]
    pub fn compute_mass(&self, density: f32) -> MassData {
        match self {
            Shape::Circle(c) => {
                let mass = density * core::f32::consts::PI * c.radius * c.radius;
                MassData {
                    mass,
                    center: c.center,
                    inertia: mass * (0.5 * c.radius * c.radius + c.center.length_squared()),
                }
            }
            Shape::Polygon(poly) => polygon_mass(poly, density),
            Shape::Edge(edge) => MassData {
                mass: 0.0,
                center: 0.5 * (edge.v1 + edge.v2),
                inertia: 0.0,
            },
            Shape::Chain(_) | Shape::TileGrid(_) => MassData::default(),
        }
    }

    /// Cast a segment against one child. Returns the entry hit, if any.
    #[must_use]
    pub fn ray_cast(&self, input: &RayCastInput, xf: &Transform2, child: usize) -> Option<RayHit> {
        match self {
            Shape::Circle(c) => ray_cast_circle(input, xf.apply(c.center), c.radius),
            Shape::Polygon(poly) => ray_cast_polygon(input, xf, poly.verts(), &poly.normals),
            Shape::Edge(edge) => ray_cast_edge(input, xf, edge),
            Shape::Chain(chain) => {
                ray_cast_edge(input, xf, &chain.segment(child.min(chain.vertices.len() - 2)))
            }
            Shape::TileGrid(grid) => {
                let poly = grid.cell_polygon(child)?;
                ray_cast_polygon(input, xf, poly.verts(), &poly.normals)
            }
        }
    }

    /// Bake a per-instance transform and uniform scale into a new shape.
    ///
    /// Each fixture owns its own shape copy so the same asset shape can be
    /// attached at different offsets and scales.
    pub fn transformed(&self, xf: &Transform2, scale: f32) -> Result<Shape, PhysicsError> {
        match self {
            Shape::Circle(c) => Ok(Shape::Circle(CircleData {
                center: xf.apply(c.center * scale),
                radius: c.radius * scale,
            })),
            Shape::Polygon(poly) => {
                let points: Vec<Vec2> = poly.verts().iter().map(|v| xf.apply(*v * scale)).collect();
                Ok(Shape::Polygon(PolygonData::new(&points)?))
            }
            Shape::Edge(edge) => Ok(Shape::Edge(EdgeData {
                v1: xf.apply(edge.v1 * scale),
                v2: xf.apply(edge.v2 * scale),
            })),
            Shape::Chain(chain) => Ok(Shape::Chain(ChainData {
                vertices: chain.vertices.iter().map(|v| xf.apply(*v * scale)).collect(),
            })),
            Shape::TileGrid(grid) => {
                let mut g = grid.clone();
                g.position = xf.apply(grid.position * scale);
                g.cell_width *= scale;
                g.cell_height *= scale;
                Ok(Shape::TileGrid(g))
            }
        }
    }

    /// Uniformly rescale in place around the body origin. Used when the
    /// owning game object's scale changes between frames.
    pub fn scale_in_place(&mut self, factor: f32) {
        match self {
            Shape::Circle(c) => {
                c.center *= factor;
                c.radius *= factor;
            }
            Shape::Polygon(poly) => {
                for v in &mut poly.vertices[..poly.count] {
                    *v *= factor;
                }
                poly.centroid *= factor;
            }
            Shape::Edge(edge) => {
                edge.v1 *= factor;
                edge.v2 *= factor;
            }
            Shape::Chain(chain) => {
                for v in &mut chain.vertices {
                    *v *= factor;
                }
            }
            Shape::TileGrid(grid) => {
                grid.position *= factor;
                grid.cell_width *= factor;
                grid.cell_height *= factor;
            }
        }
    }

    /// Mirror the shape across the body axes. Only circles and polygons
    /// support mirroring; other shapes are left untouched.
    pub fn flip(&mut self, horizontal: f32, vertical: f32) {
        match self {
            Shape::Circle(c) => {
                c.center = Vec2::new(c.center.x * horizontal, c.center.y * vertical);
            }
            Shape::Polygon(poly) => poly.flip(horizontal, vertical),
            _ => {}
        }
    }
}

fn points_aabb(points: &[Vec2], xf: &Transform2) -> Aabb {
    let first = xf.apply(points[0]);
    let mut min = first;
    let mut max = first;
    for p in &points[1..] {
        let w = xf.apply(*p);
        min = min.min(w);
        max = max.max(w);
    }
    Aabb::new(min, max)
}

fn polygon_mass(poly: &PolygonData, density: f32) -> MassData {
    let vs = poly.verts();
    let mut center = Vec2::ZERO;
    let mut area = 0.0_f32;
    let mut inertia = 0.0_f32;
    let reference = vs[0];

    const INV3: f32 = 1.0 / 3.0;
    for i in 1..vs.len() - 1 {
        let e1 = vs[i] - reference;
        let e2 = vs[i + 1] - reference;
        let d = cross(e1, e2);
        let triangle_area = 0.5 * d;
        area += triangle_area;
        center += triangle_area * INV3 * (e1 + e2);

        let intx2 = e1.x * e1.x + e2.x * e1.x + e2.x * e2.x;
        let inty2 = e1.y * e1.y + e2.y * e1.y + e2.y * e2.y;
        inertia += (0.25 * INV3 * d) * (intx2 + inty2);
    }

    let mass = density * area;
    center *= 1.0 / area;
    let local_center = center + reference;
    // Shift inertia from the reference point to the local origin
    let i = density * inertia + mass * (local_center.length_squared() - center.length_squared());
    MassData {
        mass,
        center: local_center,
        inertia: i,
    }
}

// ============================================================================
// Shape-level ray casts
// ============================================================================

fn ray_cast_circle(input: &RayCastInput, position: Vec2, radius: f32) -> Option<RayHit> {
    let s = input.p1 - position;
    let b = s.length_squared() - radius * radius;

    let r = input.p2 - input.p1;
    let c = s.dot(r);
    let rr = r.length_squared();
    let sigma = c * c - rr * b;

    if sigma < 0.0 || rr < f32::EPSILON {
        return None;
    }

    let t = -(c + sigma.sqrt());
    if t >= 0.0 && t <= input.max_fraction * rr {
        let fraction = t / rr;
        let normal = (s + fraction * r).normalize();
        return Some(RayHit { fraction, normal });
    }
    None
}

fn ray_cast_polygon(
    input: &RayCastInput,
    xf: &Transform2,
    vertices: &[Vec2],
    normals: &[Vec2; MAX_POLYGON_VERTICES],
) -> Option<RayHit> {
    // Work in local space
    let p1 = xf.apply_t(input.p1);
    let p2 = xf.apply_t(input.p2);
    let d = p2 - p1;

    let mut lower = 0.0_f32;
    let mut upper = input.max_fraction;
    let mut index: i32 = -1;

    for i in 0..vertices.len() {
        // p = p1 + t * d; dot(normal, p - v) = 0
        let numerator = normals[i].dot(vertices[i] - p1);
        let denominator = normals[i].dot(d);

        if denominator == 0.0 {
            if numerator < 0.0 {
                return None;
            }
        } else {
            let t = numerator / denominator;
            if denominator < 0.0 && t > lower {
                lower = t;
                index = i as i32;
            } else if denominator > 0.0 && t < upper {
                upper = t;
            }
        }
        if upper < lower {
            return None;
        }
    }

    if index >= 0 {
        return Some(RayHit {
            fraction: lower,
            normal: xf.q.apply(normals[index as usize]),
        });
    }
    None
}

fn ray_cast_edge(input: &RayCastInput, xf: &Transform2, edge: &EdgeData) -> Option<RayHit> {
    let p1 = xf.apply_t(input.p1);
    let p2 = xf.apply_t(input.p2);
    let d = p2 - p1;

    let e = edge.v2 - edge.v1;
    let len = e.length();
    if len < f32::EPSILON {
        return None;
    }
    let normal = Vec2::new(e.y, -e.x) / len;

    // t = dot(normal, v1 - p1) / dot(normal, d)
    let denominator = normal.dot(d);
    if denominator == 0.0 {
        return None;
    }
    let t = normal.dot(edge.v1 - p1) / denominator;
    if t < 0.0 || t > input.max_fraction {
        return None;
    }

    let q = p1 + t * d;
    // Does the hit land within the segment?
    let s = (q - edge.v1).dot(e) / (len * len);
    if !(0.0..=1.0).contains(&s) {
        return None;
    }

    let world_normal = xf.q.apply(normal);
    // Report the normal facing the ray origin
    let facing = if world_normal.dot(input.p2 - input.p1) > 0.0 {
        -world_normal
    } else {
        world_normal
    };
    Some(RayHit {
        fraction: t,
        normal: facing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_mass() {
        let shape = Shape::circle(2.0).unwrap();
        let md = shape.compute_mass(1.0);
        let expected = core::f32::consts::PI * 4.0;
        assert!((md.mass - expected).abs() < 1e-4, "mass = {}", md.mass);
    }

    #[test]
    fn test_box_mass_and_centroid() {
        let shape = Shape::box_shape(1.0, 0.5).unwrap();
        let md = shape.compute_mass(2.0);
        // 2 x 1 box at density 2 => mass 4
        assert!((md.mass - 4.0).abs() < 1e-4);
        assert!(md.center.length() < 1e-5, "box centroid at origin");
        assert!(md.inertia > 0.0);
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        let collinear = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ];
        assert!(Shape::polygon(&collinear).is_err());
        assert!(Shape::circle(0.0).is_err());
    }

    #[test]
    fn test_polygon_aabb_rotated() {
        let shape = Shape::box_shape(1.0, 1.0).unwrap();
        let xf = Transform2::new(Vec2::ZERO, core::f32::consts::FRAC_PI_4);
        let aabb = shape.compute_aabb(&xf, 0);
        let expected = core::f32::consts::SQRT_2;
        assert!((aabb.max.x - expected).abs() < 1e-4);
        assert!((aabb.max.y - expected).abs() < 1e-4);
    }

    #[test]
    fn test_chain_children() {
        let chain = Shape::Chain(
            ChainData::new(vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(2.0, 1.0),
            ])
            .unwrap(),
        );
        assert_eq!(chain.child_count(), 2);
        let aabb = chain.compute_aabb(&Transform2::IDENTITY, 1);
        assert_eq!(aabb.min, Vec2::new(1.0, 0.0));
        assert_eq!(aabb.max, Vec2::new(2.0, 1.0));
    }

    #[test]
    fn test_circle_ray_cast() {
        let shape = Shape::circle(1.0).unwrap();
        let input = RayCastInput {
            p1: Vec2::new(-3.0, 0.0),
            p2: Vec2::new(3.0, 0.0),
            max_fraction: 1.0,
        };
        let hit = shape
            .ray_cast(&input, &Transform2::IDENTITY, 0)
            .expect("ray should hit circle");
        // Entry point at x = -1 => fraction (3 - 1) / 6
        assert!((hit.fraction - 2.0 / 6.0).abs() < 1e-4);
        assert!((hit.normal - Vec2::new(-1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_polygon_ray_cast_miss() {
        let shape = Shape::box_shape(0.5, 0.5).unwrap();
        let input = RayCastInput {
            p1: Vec2::new(-3.0, 2.0),
            p2: Vec2::new(3.0, 2.0),
            max_fraction: 1.0,
        };
        assert!(shape.ray_cast(&input, &Transform2::IDENTITY, 0).is_none());
    }

    #[test]
    fn test_transformed_bakes_offset_and_scale() {
        let shape = Shape::circle(1.0).unwrap();
        let xf = Transform2::new(Vec2::new(2.0, 0.0), 0.0);
        let baked = shape.transformed(&xf, 2.0).unwrap();
        match baked {
            Shape::Circle(c) => {
                assert!((c.radius - 2.0).abs() < 1e-6);
                assert!((c.center - Vec2::new(2.0, 0.0)).length() < 1e-6);
            }
            _ => panic!("expected circle"),
        }
    }

    #[test]
    fn test_polygon_flip_keeps_winding() {
        let mut poly = PolygonData::new(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(1.0, 1.0),
        ])
        .unwrap();
        poly.flip(-1.0, 1.0);
        // Winding must still be CCW: rebuild must succeed from the vertices
        let rebuilt = PolygonData::new(&poly.verts().to_vec());
        assert!(rebuilt.is_ok(), "flipped polygon lost CCW winding");
        assert!((poly.centroid.x + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_grid_cell_polygon() {
        let hull_set = Arc::new(
            HullSet::new(
                vec![
                    Vec2::new(-0.5, -0.5),
                    Vec2::new(0.5, -0.5),
                    Vec2::new(0.5, 0.5),
                    Vec2::new(-0.5, 0.5),
                ],
                vec![Hull { index: 0, count: 4 }],
            )
            .unwrap(),
        );
        let mut grid = TileGridData::new(hull_set, Vec2::ZERO, 1.0, 1.0, 2, 2).unwrap();
        assert!(grid.cell_polygon(0).is_none(), "empty cell has no hull");

        grid.cells[0] = GridCell {
            hull: 0,
            flip_horizontal: false,
            flip_vertical: false,
        };
        let poly = grid.cell_polygon(0).expect("assigned cell");
        // Cell (0, 0) of a centered 2x2 grid spans [-1, 0] x [-1, 0]
        assert!((poly.centroid - Vec2::new(-0.5, -0.5)).length() < 1e-5);

        grid.enabled = false;
        assert!(grid.cell_polygon(0).is_none(), "disabled grid has no hulls");
    }

    #[test]
    fn test_grid_flipped_cell_winding() {
        let hull_set = Arc::new(
            HullSet::new(
                vec![
                    Vec2::new(-0.5, -0.5),
                    Vec2::new(0.5, -0.5),
                    Vec2::new(0.5, 0.5),
                ],
                vec![Hull { index: 0, count: 3 }],
            )
            .unwrap(),
        );
        let mut grid = TileGridData::new(hull_set, Vec2::ZERO, 1.0, 1.0, 1, 1).unwrap();
        grid.cells[0] = GridCell {
            hull: 0,
            flip_horizontal: true,
            flip_vertical: false,
        };
        assert!(
            grid.cell_polygon(0).is_some(),
            "mirrored hull must stay convex CCW"
        );
    }
}
