use glam::{Mat4, Vec3};

/// Source of the view and projection transforms for a frame.
///
/// The pipeline queries it once before the geometry pass and once before the
/// deferred resolve. Anything that maintains a camera can implement it.
pub trait ViewProjection {
    /// World-to-view transform.
    fn view_matrix(&self) -> Mat4;
    /// View-to-clip transform.
    fn projection_matrix(&self) -> Mat4;
}

/// A simple perspective camera for 3D scenes.
///
/// Provides position, look target, and field of view.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 25.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 45f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, target_x: f32, target_y: f32, target_z: f32) -> Self {
        self.target = Vec3::new(target_x, target_y, target_z);
        self
    }

    /// Updates the aspect ratio; call on every resize.
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }
}

impl ViewProjection for Camera {
    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_lands_on_negative_view_z() {
        let camera = Camera::new().at(0.0, 0.0, 25.0).looking_at(0.0, 0.0, 0.0);
        let p = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!((p.z + 25.0).abs() < 1e-4);
        assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4);
    }

    #[test]
    fn aspect_ignores_degenerate_values() {
        let mut camera = Camera::new();
        camera.set_aspect_ratio(0.0);
        assert_eq!(camera.aspect, 1.0);
        camera.set_aspect_ratio(16.0 / 9.0);
        assert!((camera.aspect - 16.0 / 9.0).abs() < 1e-6);
    }
}
