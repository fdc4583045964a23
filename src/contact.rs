//! Contacts and Narrow-Phase Collision
//!
//! Persistent contact objects between fixture pairs plus the exact-shape
//! manifold generation that drives them. A contact exists while the
//! broad-phase still reports the proxy pair; each step it regenerates its
//! manifold (contact points, normal, penetration depths) and updates the
//! `touching` flag — for sensors too, since trigger logic needs the
//! penetration depths.
//!
//! All shape pairs reduce to three primitive cases: circle/circle,
//! polygon/circle and polygon/polygon (edges, chain segments and grid
//! cells materialize as polygons with two or more vertices).

use crate::broadphase::ProxyTarget;
use crate::math::{Transform2, Vec2};
use crate::shapes::{Shape, MAX_POLYGON_VERTICES};

/// Maximum contact points per manifold.
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// Key of a tracked contact: the sorted broad-phase proxy pair.
pub type ContactKey = u64;

/// Pack two proxy IDs into a sorted contact key.
#[inline]
#[must_use]
pub fn contact_key(proxy_a: u32, proxy_b: u32) -> ContactKey {
    let (lo, hi) = if proxy_a < proxy_b {
        (proxy_a, proxy_b)
    } else {
        (proxy_b, proxy_a)
    };
    ((lo as u64) << 32) | hi as u64
}

// ============================================================================
// Manifold
// ============================================================================

/// How the manifold anchor data is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifoldKind {
    /// `local_point` is circle A's center
    Circles,
    /// `local_normal`/`local_point` are a face of shape A
    FaceA,
    /// `local_normal`/`local_point` are a face of shape B
    FaceB,
}

/// One contact point of a manifold.
#[derive(Clone, Copy, Debug)]
pub struct ManifoldPoint {
    /// Anchor point (interpretation depends on [`ManifoldKind`])
    pub local_point: Vec2,
    /// Accumulated normal impulse (warm-start state)
    pub normal_impulse: f32,
    /// Accumulated tangent impulse (warm-start state)
    pub tangent_impulse: f32,
    /// Penetration depth at generation time (positive = overlapping)
    pub penetration: f32,
    /// Feature ID used to match points across steps for warm starting
    pub id: u32,
}

impl Default for ManifoldPoint {
    fn default() -> Self {
        Self {
            local_point: Vec2::ZERO,
            normal_impulse: 0.0,
            tangent_impulse: 0.0,
            penetration: 0.0,
            id: 0,
        }
    }
}

/// Narrow-phase result for one shape pair.
#[derive(Clone, Copy, Debug)]
pub struct Manifold {
    pub kind: ManifoldKind,
    /// Anchor normal in shape A's local frame (unused for circles)
    pub local_normal: Vec2,
    /// Anchor point in shape A's local frame
    pub local_point: Vec2,
    pub points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    pub count: usize,
}

impl Default for Manifold {
    fn default() -> Self {
        Self {
            kind: ManifoldKind::Circles,
            local_normal: Vec2::ZERO,
            local_point: Vec2::ZERO,
            points: [ManifoldPoint::default(); MAX_MANIFOLD_POINTS],
            count: 0,
        }
    }
}

impl Manifold {
    /// Largest penetration depth over the manifold points.
    #[must_use]
    pub fn max_penetration(&self) -> f32 {
        self.points[..self.count]
            .iter()
            .fold(0.0, |acc, p| acc.max(p.penetration))
    }
}

/// Manifold evaluated in world space for callbacks and the solver.
#[derive(Clone, Copy, Debug)]
pub struct WorldManifold {
    /// Unit normal pointing from shape A to shape B
    pub normal: Vec2,
    pub points: [Vec2; MAX_MANIFOLD_POINTS],
    /// Signed separation per point (negative = penetrating)
    pub separations: [f32; MAX_MANIFOLD_POINTS],
}

impl WorldManifold {
    /// Evaluate a manifold under the two body transforms.
    #[must_use]
    pub fn new(
        manifold: &Manifold,
        xf_a: &Transform2,
        radius_a: f32,
        xf_b: &Transform2,
        radius_b: f32,
    ) -> Self {
        let mut out = Self {
            normal: Vec2::X,
            points: [Vec2::ZERO; MAX_MANIFOLD_POINTS],
            separations: [0.0; MAX_MANIFOLD_POINTS],
        };
        if manifold.count == 0 {
            return out;
        }

        match manifold.kind {
            ManifoldKind::Circles => {
                let point_a = xf_a.apply(manifold.local_point);
                let point_b = xf_b.apply(manifold.points[0].local_point);
                let d = point_b - point_a;
                out.normal = if d.length_squared() > f32::EPSILON * f32::EPSILON {
                    d.normalize()
                } else {
                    Vec2::X
                };
                let c_a = point_a + radius_a * out.normal;
                let c_b = point_b - radius_b * out.normal;
                out.points[0] = 0.5 * (c_a + c_b);
                out.separations[0] = (c_b - c_a).dot(out.normal);
            }
            ManifoldKind::FaceA => {
                out.normal = xf_a.q.apply(manifold.local_normal);
                let plane_point = xf_a.apply(manifold.local_point);
                for i in 0..manifold.count {
                    let clip_point = xf_b.apply(manifold.points[i].local_point);
                    let c_a = clip_point
                        + (radius_a - (clip_point - plane_point).dot(out.normal)) * out.normal;
                    let c_b = clip_point - radius_b * out.normal;
                    out.points[i] = 0.5 * (c_a + c_b);
                    out.separations[i] = (c_b - c_a).dot(out.normal);
                }
            }
            ManifoldKind::FaceB => {
                let normal = xf_b.q.apply(manifold.local_normal);
                let plane_point = xf_b.apply(manifold.local_point);
                for i in 0..manifold.count {
                    let clip_point = xf_a.apply(manifold.points[i].local_point);
                    let c_b = clip_point
                        + (radius_b - (clip_point - plane_point).dot(normal)) * normal;
                    let c_a = clip_point - radius_a * normal;
                    out.points[i] = 0.5 * (c_a + c_b);
                    out.separations[i] = (c_a - c_b).dot(normal);
                }
                // Flip so the reported normal points from A to B
                out.normal = -normal;
            }
        }
        out
    }
}

// ============================================================================
// Local shape views
// ============================================================================

/// Flattened per-child view every narrow-phase pair reduces to.
enum LocalShape {
    Circle {
        center: Vec2,
        radius: f32,
    },
    Poly {
        vertices: [Vec2; MAX_POLYGON_VERTICES],
        normals: [Vec2; MAX_POLYGON_VERTICES],
        count: usize,
    },
}

impl LocalShape {
    fn from_shape(shape: &Shape, child: usize) -> Option<LocalShape> {
        match shape {
            Shape::Circle(c) => Some(LocalShape::Circle {
                center: c.center,
                radius: c.radius,
            }),
            Shape::Polygon(p) => Some(LocalShape::Poly {
                vertices: p.vertices,
                normals: p.normals,
                count: p.count,
            }),
            Shape::Edge(e) => Some(segment_poly(e.v1, e.v2)),
            Shape::Chain(chain) => {
                let i = child.min(chain.vertices.len().saturating_sub(2));
                Some(segment_poly(chain.vertices[i], chain.vertices[i + 1]))
            }
            Shape::TileGrid(grid) => {
                let p = grid.cell_polygon(child)?;
                Some(LocalShape::Poly {
                    vertices: p.vertices,
                    normals: p.normals,
                    count: p.count,
                })
            }
        }
    }

}

/// Treat a segment as a two-vertex polygon with normals on both sides.
fn segment_poly(v1: Vec2, v2: Vec2) -> LocalShape {
    let e = v2 - v1;
    let n = if e.length_squared() > 1e-12 {
        Vec2::new(e.y, -e.x).normalize()
    } else {
        Vec2::Y
    };
    let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
    let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
    vertices[0] = v1;
    vertices[1] = v2;
    normals[0] = n;
    normals[1] = -n;
    LocalShape::Poly {
        vertices,
        normals,
        count: 2,
    }
}

// ============================================================================
// Contact
// ============================================================================

/// A persistent contact between two fixture children.
#[derive(Clone, Debug)]
pub struct Contact {
    pub target_a: ProxyTarget,
    pub target_b: ProxyTarget,
    pub proxy_a: u32,
    pub proxy_b: u32,
    pub manifold: Manifold,
    pub touching: bool,
    /// Mixed friction of the two fixtures
    pub friction: f32,
    /// Mixed restitution of the two fixtures
    pub restitution: f32,
    /// Either side is a sensor: no impulses, trigger events only
    pub sensor: bool,
    /// Surface radius of shape A (nonzero for circles)
    pub radius_a: f32,
    /// Surface radius of shape B
    pub radius_b: f32,
    /// Filter changed since last step; re-check and maybe destroy
    pub(crate) refilter: bool,
}

impl Contact {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        target_a: ProxyTarget,
        target_b: ProxyTarget,
        proxy_a: u32,
        proxy_b: u32,
        friction: f32,
        restitution: f32,
        sensor: bool,
        radius_a: f32,
        radius_b: f32,
    ) -> Self {
        Self {
            target_a,
            target_b,
            proxy_a,
            proxy_b,
            manifold: Manifold::default(),
            touching: false,
            friction,
            restitution,
            sensor,
            radius_a,
            radius_b,
            refilter: false,
        }
    }

    /// Regenerate the manifold, carrying accumulated impulses across steps
    /// for points whose feature IDs still match. Returns the previous
    /// touching state.
    pub(crate) fn update(
        &mut self,
        shape_a: &Shape,
        xf_a: &Transform2,
        shape_b: &Shape,
        xf_b: &Transform2,
    ) -> bool {
        let was_touching = self.touching;
        let old = self.manifold;

        self.manifold = evaluate(
            shape_a,
            xf_a,
            self.target_a.child as usize,
            shape_b,
            xf_b,
            self.target_b.child as usize,
        );
        self.touching = self.manifold.count > 0;

        for point in self.manifold.points[..self.manifold.count].iter_mut() {
            for old_point in old.points[..old.count].iter() {
                if old_point.id == point.id {
                    point.normal_impulse = old_point.normal_impulse;
                    point.tangent_impulse = old_point.tangent_impulse;
                    break;
                }
            }
        }
        was_touching
    }
}

/// Friction mixing: geometric mean, so either surface can kill sliding.
#[inline]
#[must_use]
pub fn mix_friction(a: f32, b: f32) -> f32 {
    (a * b).sqrt()
}

/// Restitution mixing: the bouncier surface wins.
#[inline]
#[must_use]
pub fn mix_restitution(a: f32, b: f32) -> f32 {
    a.max(b)
}

// ============================================================================
// Narrow-phase dispatch
// ============================================================================

/// Generate the manifold for one shape-child pair.
#[must_use]
pub fn evaluate(
    shape_a: &Shape,
    xf_a: &Transform2,
    child_a: usize,
    shape_b: &Shape,
    xf_b: &Transform2,
    child_b: usize,
) -> Manifold {
    let Some(local_a) = LocalShape::from_shape(shape_a, child_a) else {
        return Manifold::default();
    };
    let Some(local_b) = LocalShape::from_shape(shape_b, child_b) else {
        return Manifold::default();
    };

    match (&local_a, &local_b) {
        (
            LocalShape::Circle {
                center: ca,
                radius: ra,
            },
            LocalShape::Circle {
                center: cb,
                radius: rb,
            },
        ) => collide_circles(*ca, *ra, xf_a, *cb, *rb, xf_b),
        (
            LocalShape::Poly {
                vertices,
                normals,
                count,
            },
            LocalShape::Circle { center, radius },
        ) => collide_polygon_circle(
            &vertices[..*count],
            &normals[..*count],
            xf_a,
            *center,
            *radius,
            xf_b,
            false,
        ),
        (
            LocalShape::Circle { center, radius },
            LocalShape::Poly {
                vertices,
                normals,
                count,
            },
        ) => collide_polygon_circle(
            &vertices[..*count],
            &normals[..*count],
            xf_b,
            *center,
            *radius,
            xf_a,
            true,
        ),
        (
            LocalShape::Poly {
                vertices: va,
                normals: na,
                count: ca,
            },
            LocalShape::Poly {
                vertices: vb,
                normals: nb,
                count: cb,
            },
        ) => collide_polygons(
            &va[..*ca],
            &na[..*ca],
            xf_a,
            &vb[..*cb],
            &nb[..*cb],
            xf_b,
        ),
    }
}

fn collide_circles(
    center_a: Vec2,
    radius_a: f32,
    xf_a: &Transform2,
    center_b: Vec2,
    radius_b: f32,
    xf_b: &Transform2,
) -> Manifold {
    let mut manifold = Manifold::default();
    let p_a = xf_a.apply(center_a);
    let p_b = xf_b.apply(center_b);
    let d = p_b - p_a;
    let dist_sq = d.length_squared();
    let r = radius_a + radius_b;
    if dist_sq > r * r {
        return manifold;
    }

    manifold.kind = ManifoldKind::Circles;
    manifold.local_point = center_a;
    manifold.count = 1;
    manifold.points[0].local_point = center_b;
    manifold.points[0].id = 0;
    manifold.points[0].penetration = r - dist_sq.sqrt();
    manifold
}

fn collide_polygon_circle(
    vertices: &[Vec2],
    normals: &[Vec2],
    xf_poly: &Transform2,
    circle_center: Vec2,
    circle_radius: f32,
    xf_circle: &Transform2,
    flipped: bool,
) -> Manifold {
    let mut manifold = Manifold::default();

    // Circle center in polygon frame
    let c = xf_poly.apply_t(xf_circle.apply(circle_center));

    let count = vertices.len();
    let mut normal_index = 0usize;
    let mut separation = f32::MIN;
    for i in 0..count {
        let s = normals[i].dot(c - vertices[i]);
        if s > circle_radius {
            return manifold; // early out, no overlap
        }
        if s > separation {
            separation = s;
            normal_index = i;
        }
    }

    let v1 = vertices[normal_index];
    let v2 = vertices[(normal_index + 1) % count];

    manifold.kind = if flipped {
        ManifoldKind::FaceB
    } else {
        ManifoldKind::FaceA
    };
    manifold.count = 1;
    manifold.points[0].id = 0;
    manifold.points[0].local_point = circle_center;

    if separation < f32::EPSILON {
        // Center inside the polygon: use the face normal directly
        manifold.local_normal = normals[normal_index];
        manifold.local_point = 0.5 * (v1 + v2);
        manifold.points[0].penetration = circle_radius - separation;
        return manifold;
    }

    // Which face region is the center in?
    let u1 = (c - v1).dot(v2 - v1);
    let u2 = (c - v2).dot(v1 - v2);
    let (anchor, dist_sq) = if u1 <= 0.0 {
        (v1, (c - v1).length_squared())
    } else if u2 <= 0.0 {
        (v2, (c - v2).length_squared())
    } else {
        let face = 0.5 * (v1 + v2);
        let s = (c - face).dot(normals[normal_index]);
        (face, s * s)
    };
    if dist_sq > circle_radius * circle_radius {
        manifold.count = 0;
        return manifold;
    }

    let dist = dist_sq.sqrt();
    manifold.local_normal = if dist > f32::EPSILON {
        (c - anchor).normalize()
    } else {
        normals[normal_index]
    };
    manifold.local_point = anchor;
    manifold.points[0].penetration = circle_radius - dist;
    manifold
}

/// Find the edge of `poly1` with the largest separation against `poly2`.
fn find_max_separation(
    v1: &[Vec2],
    n1: &[Vec2],
    xf1: &Transform2,
    v2: &[Vec2],
    xf2: &Transform2,
) -> (usize, f32) {
    let xf = xf2.mul_t(*xf1);
    let mut best_index = 0usize;
    let mut max_separation = f32::MIN;
    for i in 0..v1.len() {
        // poly1 edge normal and vertex in poly2's frame
        let n = xf.q.apply(n1[i]);
        let v = xf.apply(v1[i]);
        let mut si = f32::MAX;
        for w in v2 {
            si = si.min(n.dot(*w - v));
        }
        if si > max_separation {
            max_separation = si;
            best_index = i;
        }
    }
    (best_index, max_separation)
}

#[derive(Clone, Copy)]
struct ClipVertex {
    v: Vec2,
    id: u32,
}

fn clip_segment(
    input: &[ClipVertex; 2],
    normal: Vec2,
    offset: f32,
    face_index: usize,
) -> Option<[ClipVertex; 2]> {
    let d0 = normal.dot(input[0].v) - offset;
    let d1 = normal.dot(input[1].v) - offset;

    let mut out = [input[0], input[1]];
    let mut count = 0usize;
    if d0 <= 0.0 {
        out[count] = input[0];
        count += 1;
    }
    if d1 <= 0.0 {
        out[count] = input[1];
        count += 1;
    }
    if d0 * d1 < 0.0 {
        let t = d0 / (d0 - d1);
        out[count] = ClipVertex {
            v: input[0].v + t * (input[1].v - input[0].v),
            id: pack_id(face_index as u8, input[0].id as u8, 1, 0),
        };
        count += 1;
    }
    if count < 2 {
        None
    } else {
        Some(out)
    }
}

#[inline]
fn pack_id(index_a: u8, index_b: u8, type_a: u8, type_b: u8) -> u32 {
    ((index_a as u32) << 24) | ((index_b as u32) << 16) | ((type_a as u32) << 8) | type_b as u32
}

fn collide_polygons(
    va: &[Vec2],
    na: &[Vec2],
    xf_a: &Transform2,
    vb: &[Vec2],
    nb: &[Vec2],
    xf_b: &Transform2,
) -> Manifold {
    let mut manifold = Manifold::default();

    let (edge_a, separation_a) = find_max_separation(va, na, xf_a, vb, xf_b);
    if separation_a > 0.0 {
        return manifold;
    }
    let (edge_b, separation_b) = find_max_separation(vb, nb, xf_b, va, xf_a);
    if separation_b > 0.0 {
        return manifold;
    }

    // Reference face is the one with the larger separation (small tolerance
    // keeps frame-to-frame choice stable)
    let (rv, rn, iv, inorm, xf1, xf2, edge1, kind) = if separation_b > separation_a + 0.001 {
        (vb, nb, va, na, xf_b, xf_a, edge_b, ManifoldKind::FaceB)
    } else {
        (va, na, vb, nb, xf_a, xf_b, edge_a, ManifoldKind::FaceA)
    };
    let flip = kind == ManifoldKind::FaceB;

    // Find the incident edge: the edge of poly2 most anti-parallel to the
    // reference normal
    let normal1 = xf2.q.apply_t(xf1.q.apply(rn[edge1]));
    let mut incident = 0usize;
    let mut min_dot = f32::MAX;
    for (i, n) in inorm.iter().enumerate() {
        let dot = normal1.dot(*n);
        if dot < min_dot {
            min_dot = dot;
            incident = i;
        }
    }

    let i1 = incident;
    let i2 = (incident + 1) % iv.len();
    let incident_edge = [
        ClipVertex {
            v: xf2.apply(iv[i1]),
            id: pack_id(edge1 as u8, i1 as u8, 1, 0),
        },
        ClipVertex {
            v: xf2.apply(iv[i2]),
            id: pack_id(edge1 as u8, i2 as u8, 1, 0),
        },
    ];

    let iv1 = edge1;
    let iv2 = (edge1 + 1) % rv.len();
    let v11 = xf1.apply(rv[iv1]);
    let v12 = xf1.apply(rv[iv2]);

    let local_tangent = (rv[iv2] - rv[iv1]).normalize();
    let tangent = xf1.q.apply(local_tangent);
    let normal = Vec2::new(tangent.y, -tangent.x);

    let side_offset1 = -tangent.dot(v11);
    let side_offset2 = tangent.dot(v12);
    let front_offset = normal.dot(v11);

    let Some(clip1) = clip_segment(&incident_edge, -tangent, side_offset1, iv1) else {
        return manifold;
    };
    let Some(clip2) = clip_segment(&clip1, tangent, side_offset2, iv2) else {
        return manifold;
    };

    manifold.kind = kind;
    manifold.local_normal = rn[edge1];
    manifold.local_point = 0.5 * (rv[iv1] + rv[iv2]);

    let mut count = 0usize;
    for cv in &clip2 {
        let separation = normal.dot(cv.v) - front_offset;
        if separation <= 0.0 {
            let point = &mut manifold.points[count];
            point.local_point = xf2.apply_t(cv.v);
            point.penetration = -separation;
            point.id = if flip {
                // Keep IDs stable regardless of which polygon was reference
                cv.id.rotate_left(16)
            } else {
                cv.id
            };
            count += 1;
            if count == MAX_MANIFOLD_POINTS {
                break;
            }
        }
    }
    manifold.count = count;
    manifold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::Shape;

    fn xf(x: f32, y: f32) -> Transform2 {
        Transform2::new(Vec2::new(x, y), 0.0)
    }

    #[test]
    fn test_circles_overlap() {
        let a = Shape::circle(1.0).unwrap();
        let b = Shape::circle(1.0).unwrap();
        let m = evaluate(&a, &xf(0.0, 0.0), 0, &b, &xf(1.5, 0.0), 0);
        assert_eq!(m.count, 1);
        assert!((m.points[0].penetration - 0.5).abs() < 1e-5);

        let miss = evaluate(&a, &xf(0.0, 0.0), 0, &b, &xf(3.0, 0.0), 0);
        assert_eq!(miss.count, 0);
    }

    #[test]
    fn test_world_manifold_normal_a_to_b() {
        let a = Shape::circle(1.0).unwrap();
        let b = Shape::circle(1.0).unwrap();
        let xa = xf(0.0, 0.0);
        let xb = xf(1.5, 0.0);
        let m = evaluate(&a, &xa, 0, &b, &xb, 0);
        let wm = WorldManifold::new(&m, &xa, 1.0, &xb, 1.0);
        assert!((wm.normal - Vec2::X).length() < 1e-5);
        assert!(wm.separations[0] < 0.0, "penetrating pair has negative separation");
    }

    #[test]
    fn test_polygon_circle() {
        let poly = Shape::box_shape(1.0, 1.0).unwrap();
        let circle = Shape::circle(0.5).unwrap();
        // Circle resting on top face, overlapping by 0.25
        let m = evaluate(&poly, &xf(0.0, 0.0), 0, &circle, &xf(0.0, 1.25), 0);
        assert_eq!(m.count, 1);
        assert_eq!(m.kind, ManifoldKind::FaceA);
        assert!((m.points[0].penetration - 0.25).abs() < 1e-5);
        // Face normal points up, towards the circle
        assert!((m.local_normal - Vec2::Y).length() < 1e-5);
    }

    #[test]
    fn test_circle_polygon_flipped_normal() {
        let poly = Shape::box_shape(1.0, 1.0).unwrap();
        let circle = Shape::circle(0.5).unwrap();
        let xa = xf(0.0, 1.25);
        let xb = xf(0.0, 0.0);
        // Circle is shape A this time
        let m = evaluate(&circle, &xa, 0, &poly, &xb, 0);
        assert_eq!(m.count, 1);
        assert_eq!(m.kind, ManifoldKind::FaceB);
        let wm = WorldManifold::new(&m, &xa, 0.0, &xb, 0.0);
        // Normal must point from the circle (A) down into the box (B)
        assert!(wm.normal.y < -0.9, "normal = {:?}", wm.normal);
    }

    #[test]
    fn test_boxes_stacked() {
        let a = Shape::box_shape(1.0, 1.0).unwrap();
        let b = Shape::box_shape(1.0, 1.0).unwrap();
        // Box B sits on A, overlapping by 0.1
        let m = evaluate(&a, &xf(0.0, 0.0), 0, &b, &xf(0.0, 1.9), 0);
        assert_eq!(m.count, 2, "face contact should produce two points");
        assert!(m.max_penetration() > 0.05);
        let wm = WorldManifold::new(&m, &xf(0.0, 0.0), 0.0, &xf(0.0, 1.9), 0.0);
        assert!(wm.normal.y.abs() > 0.99);
    }

    #[test]
    fn test_boxes_separated() {
        let a = Shape::box_shape(1.0, 1.0).unwrap();
        let b = Shape::box_shape(1.0, 1.0).unwrap();
        let m = evaluate(&a, &xf(0.0, 0.0), 0, &b, &xf(5.0, 0.0), 0);
        assert_eq!(m.count, 0);
    }

    #[test]
    fn test_edge_vs_circle() {
        let edge = Shape::Edge(crate::shapes::EdgeData {
            v1: Vec2::new(-2.0, 0.0),
            v2: Vec2::new(2.0, 0.0),
        });
        let circle = Shape::circle(0.5).unwrap();
        let m = evaluate(&edge, &xf(0.0, 0.0), 0, &circle, &xf(0.0, 0.25), 0);
        assert_eq!(m.count, 1, "circle should rest on the edge");
    }

    #[test]
    fn test_warm_start_impulses_carry_by_id() {
        let a = Shape::box_shape(1.0, 1.0).unwrap();
        let b = Shape::box_shape(1.0, 1.0).unwrap();
        let ta = ProxyTarget {
            body: 0,
            fixture: 0,
            child: 0,
        };
        let tb = ProxyTarget {
            body: 1,
            fixture: 0,
            child: 0,
        };
        let mut contact = Contact::new(ta, tb, 0, 1, 0.2, 0.0, false, 0.0, 0.0);

        contact.update(&a, &xf(0.0, 0.0), &b, &xf(0.0, 1.9));
        assert!(contact.touching);
        for p in &mut contact.manifold.points[..contact.manifold.count] {
            p.normal_impulse = 5.0;
        }

        // Same configuration next step: IDs match, impulses survive
        contact.update(&a, &xf(0.0, 0.0), &b, &xf(0.0, 1.9));
        for p in &contact.manifold.points[..contact.manifold.count] {
            assert_eq!(p.normal_impulse, 5.0, "impulse lost across update");
        }
    }

    #[test]
    fn test_contact_key_sorted() {
        assert_eq!(contact_key(7, 3), contact_key(3, 7));
        assert_ne!(contact_key(3, 7), contact_key(3, 8));
    }

    #[test]
    fn test_mixing_rules() {
        assert!((mix_friction(0.4, 0.9) - 0.6).abs() < 1e-6);
        assert_eq!(mix_restitution(0.2, 0.7), 0.7);
    }
}
