//! Core IMU data types
//!
//! A [`Sample`] is the minimal input contract: one timestamped reading of
//! linear acceleration, angular velocity and orientation from one sensor.
//! Samples are `Copy` and never mutated after ingestion.

use jumpsense_common::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Three-axis vector [x, y, z]
pub type Vec3 = [f64; 3];

/// Euclidean norm of a three-axis vector
pub fn norm(v: &Vec3) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Dot product of two three-axis vectors
pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Identifier of one physical sensor within a recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub u32);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor-{}", self.0)
    }
}

/// Identifier of one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Orientation quaternion (w, x, y, z)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit length; a zero quaternion becomes the identity
    pub fn normalized(&self) -> Self {
        let n = self.norm();
        if n == 0.0 || !n.is_finite() {
            return Self::IDENTITY;
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A single IMU reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic timestamp (microseconds)
    pub timestamp: Timestamp,
    /// Sensor that produced the reading
    pub sensor_id: SensorId,
    /// Accelerometer reading [x, y, z] in m/s², gravity included
    pub linear_acceleration: Vec3,
    /// Gyroscope reading [x, y, z] in deg/s
    pub angular_velocity: Vec3,
    /// Sensor orientation (unit quaternion)
    #[serde(default)]
    pub orientation: Quaternion,
}

impl Sample {
    pub fn new(
        timestamp: Timestamp,
        sensor_id: SensorId,
        linear_acceleration: Vec3,
        angular_velocity: Vec3,
        orientation: Quaternion,
    ) -> Self {
        Self {
            timestamp,
            sensor_id,
            linear_acceleration,
            angular_velocity,
            orientation,
        }
    }

    /// Magnitude of acceleration in m/s²
    pub fn accel_magnitude(&self) -> f64 {
        norm(&self.linear_acceleration)
    }

    /// Magnitude of angular velocity in deg/s
    pub fn gyro_magnitude(&self) -> f64 {
        norm(&self.angular_velocity)
    }

    /// True when every numeric component is finite
    pub fn is_finite(&self) -> bool {
        self.linear_acceleration.iter().all(|v| v.is_finite())
            && self.angular_velocity.iter().all(|v| v.is_finite())
            && self.orientation.is_finite()
    }
}
