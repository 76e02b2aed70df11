use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::stimulus::{DrawInstruction, Rgb};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DotConfig {
    #[serde(default = "DotConfig::default_radius")]
    pub radius: f32,
    #[serde(default = "DotConfig::default_color")]
    pub color: Rgb,
    /// Percentage of the field area covered by dots.
    #[serde(default = "DotConfig::default_fill_pct")]
    pub fill_pct: f32,
    /// Pixels per second.
    #[serde(default = "DotConfig::default_velocity")]
    pub velocity: f32,
    /// Frames before a dot is respawned at a random position.
    #[serde(default = "DotConfig::default_lifetime")]
    pub lifetime: u32,
}

impl DotConfig {
    fn default_radius() -> f32 {
        10.0
    }
    fn default_color() -> Rgb {
        [255, 255, 255]
    }
    fn default_fill_pct() -> f32 {
        15.0
    }
    fn default_velocity() -> f32 {
        300.0
    }
    fn default_lifetime() -> u32 {
        60
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(format!("dot radius must be > 0, got {}", self.radius));
        }
        if !(self.fill_pct > 0.0 && self.fill_pct <= 100.0) {
            return Err(format!("dot fill must be in (0, 100], got {}", self.fill_pct));
        }
        if !self.velocity.is_finite() || self.velocity < 0.0 {
            return Err(format!("dot velocity must be >= 0, got {}", self.velocity));
        }
        if self.lifetime == 0 {
            return Err("dot lifetime must be at least one frame".to_string());
        }
        Ok(())
    }
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            radius: Self::default_radius(),
            color: Self::default_color(),
            fill_pct: Self::default_fill_pct(),
            velocity: Self::default_velocity(),
            lifetime: Self::default_lifetime(),
        }
    }
}

/// Random-dot kinematogram seeded per trial.
///
/// The first `round(|coherence| * n / 100)` dots move horizontally toward the
/// coherence sign; the rest keep a random heading. Every dot respawns at a
/// random position after `lifetime` frames and wraps at the field edges.
#[derive(Debug, Clone)]
pub struct RandomDotMotion {
    rng: StdRng,
    width: f32,
    height: f32,
    x: Vec<f32>,
    y: Vec<f32>,
    age: Vec<u32>,
    heading_deg: Vec<f32>,
    lifetime: u32,
    step: f32,
    coherent: usize,
    radius: f32,
    color: Rgb,
}

impl RandomDotMotion {
    pub fn new(
        cfg: &DotConfig,
        width: u32,
        height: u32,
        seed: u64,
        signed_coherence: f64,
        frame_rate: f64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let (w, h) = (width.max(1), height.max(1));
        let area = w as f64 * h as f64;
        let dot_area = std::f64::consts::PI * (cfg.radius as f64).powi(2);
        let n = ((cfg.fill_pct as f64 / 100.0) * area / dot_area).round() as usize;
        let lifetime = cfg.lifetime.max(1);

        let x = (0..n).map(|_| rng.random_range(0..w) as f32).collect();
        let y = (0..n).map(|_| rng.random_range(0..h) as f32).collect();
        let age = (0..n).map(|_| rng.random_range(0..lifetime)).collect();
        let mut heading_deg: Vec<f32> = (0..n).map(|_| rng.random_range(0..360u32) as f32).collect();

        let coherence = if signed_coherence.is_finite() {
            signed_coherence.clamp(-100.0, 100.0)
        } else {
            0.0
        };
        let coherent = ((coherence.abs() * n as f64 / 100.0).round() as usize).min(n);
        let direction = if coherence < 0.0 { -90.0 } else { 90.0 };
        for h in heading_deg.iter_mut().take(coherent) {
            *h = direction;
        }

        let rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            60.0
        };
        Self {
            rng,
            width: w as f32,
            height: h as f32,
            x,
            y,
            age,
            heading_deg,
            lifetime,
            step: (cfg.velocity as f64 / rate).trunc() as f32,
            coherent,
            radius: cfg.radius,
            color: cfg.color,
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn coherent_dots(&self) -> usize {
        self.coherent
    }

    /// Move every dot one frame.
    pub fn advance(&mut self) {
        let (w, h) = (self.width as u32, self.height as u32);
        for i in 0..self.x.len() {
            if self.age[i] >= self.lifetime {
                self.x[i] = self.rng.random_range(0..w) as f32;
                self.y[i] = self.rng.random_range(0..h) as f32;
                self.age[i] = 0;
            }
            let theta = self.heading_deg[i].to_radians();
            self.x[i] += self.step * theta.sin();
            self.y[i] += self.step * theta.cos();
            self.age[i] += 1;

            if self.x[i] >= self.width {
                self.x[i] = 0.0;
            } else if self.x[i] < 0.0 {
                self.x[i] = self.width;
            }
            if self.y[i] >= self.height {
                self.y[i] = 0.0;
            } else if self.y[i] < 0.0 {
                self.y[i] = self.height;
            }
        }
    }

    pub fn positions(&self) -> Vec<[f32; 2]> {
        self.x.iter().zip(&self.y).map(|(&x, &y)| [x, y]).collect()
    }

    pub fn frame(&self, background: Rgb) -> DrawInstruction {
        DrawInstruction::Dots {
            background,
            color: self.color,
            radius: self.radius,
            positions: self.positions(),
        }
    }
}
