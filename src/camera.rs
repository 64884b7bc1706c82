use glam::{Mat4, Vec3};

/// Minimal yaw/pitch camera that produces the per-frame model-view-projection
/// matrix the sort passes consume.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let mut camera = Self {
            position,
            forward: Vec3::NEG_Z,
            right: Vec3::X,
            up: Vec3::Y,
            yaw,
            pitch,
            fov: std::f32::consts::PI / 3.0,
            near: 0.01,
            far: 100.0,
        };
        camera.update_vectors();
        camera
    }

    pub fn update_vectors(&mut self) {
        let forward = Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize();

        let right = forward.cross(Vec3::Y).normalize_or_zero();

        self.forward = forward;
        self.right = if right.length_squared() < 1e-6 {
            Vec3::X
        } else {
            right
        };
        self.up = self.right.cross(forward).normalize();
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    /// Right-handed perspective with a `[0, 1]` clip depth range.
    pub fn projection_matrix(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect_ratio.max(1e-6), self.near, self.far)
    }

    pub fn mvp(&self, aspect_ratio: f32) -> Mat4 {
        self.projection_matrix(aspect_ratio) * self.view_matrix()
    }
}

pub fn look_at_target(camera: &mut Camera, target: Vec3) {
    let to_target = (target - camera.position).normalize_or_zero();
    if to_target.length_squared() < 1e-8 {
        return;
    }
    camera.yaw = to_target.z.atan2(to_target.x);
    camera.pitch = to_target.y.clamp(-1.0, 1.0).asin();
    camera.update_vectors();
}

/// Places the camera on a horizontal circle around `target`, looking at it.
pub fn orbit(camera: &mut Camera, target: Vec3, radius: f32, angle: f32, height: f32) {
    camera.position = target + Vec3::new(radius * angle.cos(), height, radius * angle.sin());
    look_at_target(camera, target);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_points_forward_at_target() {
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), 0.0, 0.0);
        look_at_target(&mut camera, Vec3::ZERO);
        assert!((camera.forward - Vec3::NEG_Z).length() < 1e-5);
        assert!((camera.up - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn mvp_depth_grows_with_distance() {
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), 0.0, 0.0);
        look_at_target(&mut camera, Vec3::ZERO);
        let mvp = camera.mvp(1.5);
        let near = mvp.row(2).truncate().dot(Vec3::new(0.0, 0.0, 2.0));
        let far = mvp.row(2).truncate().dot(Vec3::new(0.0, 0.0, -2.0));
        assert!(near < far);
    }

    #[test]
    fn orbit_keeps_radius() {
        let mut camera = Camera::new(Vec3::ZERO, 0.0, 0.0);
        let target = Vec3::new(1.0, 2.0, 3.0);
        orbit(&mut camera, target, 4.0, 0.7, 0.5);
        let flat = camera.position - target;
        assert!(((flat.x * flat.x + flat.z * flat.z).sqrt() - 4.0).abs() < 1e-5);
        assert!((camera.forward - (target - camera.position).normalize()).length() < 1e-4);
    }
}
