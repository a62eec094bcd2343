//! Synthetic IMU recordings for integration tests
//!
//! Streams are built phase by phase: standing on the ice reads about 1 g,
//! free-fall close to 0 g, landing a short spike well above 1 g.

#![allow(dead_code)]

use jumpsense::labels::{JumpLabels, JumpType, LandingOutcome};
use jumpsense::segmenter::JumpSegment;
use jumpsense::types::{Quaternion, Sample, SensorId, SessionId, STANDARD_GRAVITY};
use jumpsense::{FeatureExtractor, JumpSegmenter, Session};
use jumpsense_common::Timestamp;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::path::Path;

/// Default synthetic sample rate
pub const RATE_HZ: f64 = 100.0;

/// Shape of one synthetic jump
#[derive(Debug, Clone, Copy)]
pub struct JumpShape {
    pub air_time_s: f64,
    /// Spin about the sensor z axis while airborne
    pub spin_dps: f64,
    /// Landing spike, in g
    pub impact_g: f64,
    /// Samples the spike lasts
    pub impact_samples: usize,
}

impl Default for JumpShape {
    fn default() -> Self {
        Self {
            air_time_s: 0.5,
            spin_dps: 720.0,
            impact_g: 3.0,
            impact_samples: 2,
        }
    }
}

impl JumpShape {
    /// A landed jump of about `revolutions` turns
    pub fn rotating(revolutions: f64, air_time_s: f64) -> Self {
        Self {
            air_time_s,
            spin_dps: revolutions * 360.0 / air_time_s,
            ..Default::default()
        }
    }

    /// A fall: hard, long landing spike
    pub fn fall(mut self) -> Self {
        self.impact_g = 6.0;
        self.impact_samples = 8;
        self
    }
}

/// Builds one sensor's stream
pub struct StreamBuilder {
    sensor_id: SensorId,
    period_us: u64,
    samples: Vec<Sample>,
    rng: StdRng,
    noise: f64,
}

impl StreamBuilder {
    pub fn new(sensor_id: u32) -> Self {
        Self {
            sensor_id: SensorId(sensor_id),
            period_us: (1_000_000.0 / RATE_HZ) as u64,
            samples: Vec::new(),
            rng: StdRng::seed_from_u64(u64::from(sensor_id)),
            noise: 0.0,
        }
    }

    /// Uniform noise of `amplitude` m/s² on every reading
    pub fn with_noise(mut self, seed: u64, amplitude: f64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.noise = amplitude;
        self
    }

    /// Seconds covered so far (time of the next sample)
    pub fn time_s(&self) -> f64 {
        self.samples.len() as f64 * self.period_us as f64 / 1e6
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    fn push(&mut self, magnitude: f64, gyro: [f64; 3]) {
        let jitter = if self.noise > 0.0 {
            self.rng.gen_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        let t = Timestamp::from_micros(self.samples.len() as u64 * self.period_us);
        self.samples.push(Sample::new(
            t,
            self.sensor_id,
            [0.0, 0.0, magnitude + jitter],
            gyro,
            Quaternion::IDENTITY,
        ));
    }

    /// Stand still for `seconds`
    pub fn ground(mut self, seconds: f64) -> Self {
        let n = (seconds * RATE_HZ).round() as usize;
        for _ in 0..n {
            self.push(STANDARD_GRAVITY, [0.0; 3]);
        }
        self
    }

    /// Constant acceleration magnitude, no rotation, for `seconds`
    pub fn hold(mut self, magnitude: f64, seconds: f64) -> Self {
        let n = (seconds * RATE_HZ).round() as usize;
        for _ in 0..n {
            self.push(magnitude, [0.0; 3]);
        }
        self
    }

    /// One jump followed by the landing spike (settling is left to `ground`)
    pub fn jump(mut self, shape: &JumpShape) -> Self {
        let airborne = (shape.air_time_s * RATE_HZ).round() as usize;
        for _ in 0..airborne {
            self.push(0.5, [0.0, 0.0, shape.spin_dps]);
        }
        for _ in 0..shape.impact_samples {
            self.push(shape.impact_g * STANDARD_GRAVITY, [0.0, 0.0, shape.spin_dps * 0.1]);
        }
        self
    }

    pub fn build(self) -> Vec<Sample> {
        self.samples
    }
}

/// Single-sensor session: 2 s on the ice, one jump, 2 s on the ice
pub fn single_jump_session(shape: &JumpShape) -> Session {
    let samples = StreamBuilder::new(0).ground(2.0).jump(shape).ground(2.0).build();
    Session::from_samples(SessionId::new(), samples)
}

/// Session of `shapes` separated by `gap_s` seconds on the ice
pub fn jump_sequence(sensor_id: u32, shapes: &[JumpShape], gap_s: f64) -> Vec<Sample> {
    let mut builder = StreamBuilder::new(sensor_id).ground(1.0);
    for shape in shapes {
        builder = builder.jump(shape).ground(gap_s);
    }
    builder.build()
}

/// Segments with features for a session, using default settings
pub fn detect(session: &Session) -> Vec<JumpSegment> {
    let mut segments = JumpSegmenter::default().segment(session);
    let failures = FeatureExtractor::default().enrich(session, &mut segments);
    assert_eq!(failures, 0, "synthetic segments must always extract");
    segments
}

/// Labeled corpus for the success model: landings and falls of varied rotation
pub fn success_corpus(per_class: usize) -> Vec<JumpSegment> {
    let mut segments = Vec::new();
    for outcome in [LandingOutcome::Landed, LandingOutcome::Fall] {
        let shapes: Vec<JumpShape> = (0..per_class)
            .map(|i| {
                let shape = JumpShape::rotating(1.0 + (i % 3) as f64, 0.4 + 0.02 * (i % 5) as f64);
                match outcome {
                    LandingOutcome::Landed => shape,
                    LandingOutcome::Fall => shape.fall(),
                }
            })
            .collect();
        let session = Session::from_samples(SessionId::new(), jump_sequence(0, &shapes, 2.0));
        let mut detected = detect(&session);
        assert_eq!(detected.len(), per_class);
        for segment in &mut detected {
            segment.labels = JumpLabels::new(None, Some(outcome));
        }
        segments.extend(detected);
    }
    segments
}

/// Labeled corpus for the type model: each element gets a distinct rotation profile
pub fn type_corpus(per_class: usize) -> Vec<JumpSegment> {
    let mut segments = Vec::new();
    for (k, jump_type) in [
        JumpType::Toeloop,
        JumpType::Salchow,
        JumpType::Loop,
        JumpType::Flip,
        JumpType::Lutz,
        JumpType::Axel,
    ]
    .into_iter()
    .enumerate()
    {
        let shapes: Vec<JumpShape> = (0..per_class)
            .map(|i| JumpShape::rotating(1.0 + k as f64 * 0.5, 0.3 + 0.05 * k as f64 + 0.01 * i as f64))
            .collect();
        let session = Session::from_samples(SessionId::new(), jump_sequence(0, &shapes, 2.0));
        let mut detected = detect(&session);
        assert_eq!(detected.len(), per_class);
        for segment in &mut detected {
            segment.labels = JumpLabels::new(Some(jump_type), None);
        }
        segments.extend(detected);
    }
    segments
}

/// Write samples as a Movella DOT style CSV export
///
/// `SampleTimeFine` is written as a 32-bit counter starting at `raw_start`,
/// so long recordings or a high start value wrap around.
pub fn write_movella_csv(path: &Path, samples: &[Sample], raw_start: u32) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(
        file,
        "PacketCounter,SampleTimeFine,Quat_W,Quat_X,Quat_Y,Quat_Z,Acc_X,Acc_Y,Acc_Z,Gyr_X,Gyr_Y,Gyr_Z"
    )?;
    for (i, s) in samples.iter().enumerate() {
        let raw = raw_start.wrapping_add(s.timestamp.as_micros() as u32);
        let q = s.orientation;
        let [ax, ay, az] = s.linear_acceleration;
        let [gx, gy, gz] = s.angular_velocity;
        writeln!(
            file,
            "{i},{raw},{},{},{},{},{ax},{ay},{az},{gx},{gy},{gz}",
            q.w, q.x, q.y, q.z
        )?;
    }
    Ok(())
}
