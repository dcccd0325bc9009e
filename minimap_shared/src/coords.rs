//! Coordinate mapping.
//!
//! Projects world positions onto the unit square of the minimap and back.
//! The bounds come from a planar reference object: its center, its local
//! scale and a fixed logical half-extent (a unit plane spans `[-5, 5]`).

use crate::{
    ecs::{SceneView, Transform},
    error::{MinimapError, MinimapResult},
    math::{Vec2, Vec3},
};

/// Half-extent of an unscaled reference plane, in world units.
pub const DEFAULT_HALF_EXTENT: f32 = 5.0;

/// Value reported on an axis whose bounds have zero width.
pub const DEGENERATE_AXIS: f32 = 0.5;

/// Horizontal bounds of the reference plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    min: Vec2,
    max: Vec2,
}

impl CoordinateMapper {
    /// Bounds from a reference plane's center and local scale.
    pub fn from_plane(center: Vec3, scale: Vec3, half_extent: f32) -> Self {
        let ex = half_extent * scale.x;
        let ez = half_extent * scale.z;
        Self {
            min: Vec2::new(center.x - ex, center.z - ez),
            max: Vec2::new(center.x + ex, center.z + ez),
        }
    }

    pub fn from_transform(plane: &Transform, half_extent: f32) -> Self {
        Self::from_plane(plane.position, plane.scale, half_extent)
    }

    /// Looks the reference plane up by name.
    pub fn from_scene(
        scene: &impl SceneView,
        plane_name: &str,
        half_extent: f32,
    ) -> MinimapResult<Self> {
        let plane = scene
            .named_transform(plane_name)
            .ok_or_else(|| MinimapError::ReferencePlaneMissing(plane_name.to_string()))?;
        Ok(Self::from_transform(&plane, half_extent))
    }

    pub fn min(&self) -> Vec2 {
        self.min
    }

    pub fn max(&self) -> Vec2 {
        self.max
    }

    /// World position -> normalized `[0,1]²`, clamped.
    pub fn project(&self, p: Vec3) -> Vec2 {
        Vec2::new(
            normalize(p.x, self.min.x, self.max.x),
            normalize(p.z, self.min.y, self.max.y),
        )
    }

    /// Normalized coordinate -> world position on the plane (`y = height`).
    ///
    /// Inputs outside `[0,1]` are clamped first, so remote clicks can never
    /// land off the map.
    pub fn invert(&self, n: Vec2, height: f32) -> Vec3 {
        Vec3::new(
            denormalize(n.x, self.min.x, self.max.x),
            height,
            denormalize(n.y, self.min.y, self.max.y),
        )
    }
}

fn normalize(v: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span.abs() <= f32::EPSILON || !span.is_finite() {
        return DEGENERATE_AXIS;
    }
    let t = (v - min) / span;
    if t.is_nan() {
        return DEGENERATE_AXIS;
    }
    t.clamp(0.0, 1.0)
}

fn denormalize(t: f32, min: f32, max: f32) -> f32 {
    let t = if t.is_nan() { DEGENERATE_AXIS } else { t.clamp(0.0, 1.0) };
    min + (max - min) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Name, World};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const EPS: f32 = 1e-4;

    fn unit_mapper() -> CoordinateMapper {
        CoordinateMapper::from_plane(Vec3::ZERO, Vec3::ONE, DEFAULT_HALF_EXTENT)
    }

    #[test]
    fn scenario_inside_and_clamped() {
        let m = unit_mapper();
        assert_eq!(m.project(Vec3::new(2.5, 7.0, 2.5)), Vec2::new(0.75, 0.75));
        assert_eq!(m.project(Vec3::new(10.0, 0.0, 0.0)), Vec2::new(1.0, 0.5));
    }

    #[test]
    fn scale_and_center_shift_bounds() {
        let m = CoordinateMapper::from_plane(Vec3::new(10.0, 0.0, -10.0), Vec3::new(2.0, 1.0, 0.5), 5.0);
        assert_eq!(m.min(), Vec2::new(0.0, -12.5));
        assert_eq!(m.max(), Vec2::new(20.0, -7.5));
        assert_eq!(m.project(Vec3::new(5.0, 0.0, -10.0)), Vec2::new(0.25, 0.5));
    }

    #[test]
    fn degenerate_axis_falls_back() {
        let m = CoordinateMapper::from_plane(Vec3::ZERO, Vec3::new(0.0, 1.0, 1.0), 5.0);
        let n = m.project(Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(n.x, DEGENERATE_AXIS);
        assert_eq!(n.y, 0.5);
        assert!(!n.x.is_nan());
        assert_eq!(m.invert(Vec2::new(0.9, 0.5), 0.0).x, 0.0);
    }

    #[test]
    fn strictly_inside_stays_open_interval() {
        let m = unit_mapper();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let p = Vec3::new(rng.gen_range(-4.99..4.99), 0.0, rng.gen_range(-4.99..4.99));
            let n = m.project(p);
            assert!(n.x > 0.0 && n.x < 1.0, "{p:?} -> {n:?}");
            assert!(n.y > 0.0 && n.y < 1.0, "{p:?} -> {n:?}");
        }
    }

    #[test]
    fn outside_is_clamped_to_edges() {
        let m = unit_mapper();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1_000 {
            let sx = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let sz = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let p = Vec3::new(sx * rng.gen_range(5.01..500.0), 0.0, sz * rng.gen_range(5.01..500.0));
            let n = m.project(p);
            assert!(n.x == 0.0 || n.x == 1.0, "{p:?} -> {n:?}");
            assert!(n.y == 0.0 || n.y == 1.0, "{p:?} -> {n:?}");
        }
    }

    #[test]
    fn project_is_pure() {
        let m = unit_mapper();
        let p = Vec3::new(-1.25, 3.0, 4.0);
        let first = m.project(p);
        for _ in 0..10 {
            assert_eq!(m.project(p), first);
        }
    }

    #[test]
    fn invert_recovers_horizontal_components() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..200 {
            let center = Vec3::new(rng.gen_range(-50.0..50.0), 0.0, rng.gen_range(-50.0..50.0));
            let scale = Vec3::new(rng.gen_range(0.5..4.0), 1.0, rng.gen_range(0.5..4.0));
            let m = CoordinateMapper::from_plane(center, scale, DEFAULT_HALF_EXTENT);
            for _ in 0..20 {
                let p = Vec3::new(
                    rng.gen_range(m.min().x..m.max().x),
                    0.0,
                    rng.gen_range(m.min().y..m.max().y),
                );
                let back = m.invert(m.project(p), 0.0);
                assert!((back.x - p.x).abs() < EPS * 100.0, "{p:?} -> {back:?}");
                assert!((back.z - p.z).abs() < EPS * 100.0, "{p:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn missing_reference_plane_is_an_error() {
        let world = World::default();
        let err = CoordinateMapper::from_scene(&world, "Ground", 5.0).unwrap_err();
        assert!(matches!(err, MinimapError::ReferencePlaneMissing(name) if name == "Ground"));

        let mut world = World::default();
        let ground = world.spawn();
        world.insert(ground, Name("Ground".into()));
        world.insert(ground, Transform::at(Vec3::ZERO));
        assert_eq!(CoordinateMapper::from_scene(&world, "Ground", 5.0).unwrap(), unit_mapper());
    }
}
