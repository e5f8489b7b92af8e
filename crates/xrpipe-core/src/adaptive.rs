//! Adaptive pixel density.
//!
//! Steps through a fixed ascending ladder of density values instead of
//! varying density continuously, so render targets only change at discrete
//! points and the controller cannot oscillate on noise.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Tuning for [`AdaptiveDensity`]. Fractions are of `gpu_budget_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// GPU time the controller aims to stay under, in milliseconds.
    pub gpu_budget_ms: f32,
    /// Ascending density values.
    pub ladder: Vec<f32>,
    /// Above this the controller sheds load immediately.
    pub step_down_fraction: f32,
    /// Three consecutive samples below this allow a step up.
    pub step_up_fraction: f32,
    /// Above this the controller extrapolates the trend.
    pub predict_fraction: f32,
    /// Samples ignored after a step down.
    pub cooldown_frames: u32,
    pub step_down_rungs: usize,
    pub step_up_rungs: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            gpu_budget_ms: 11.1,
            ladder: (0..=8).map(|i| (60 + 5 * i) as f32 / 100.0).collect(),
            step_down_fraction: 0.9,
            step_up_fraction: 0.7,
            predict_fraction: 0.85,
            cooldown_frames: 2,
            step_down_rungs: 2,
            step_up_rungs: 1,
        }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> xrpipe_common::Result<()> {
        use xrpipe_common::Error;

        if self.ladder.is_empty() {
            return Err(Error::config("adaptive ladder is empty"));
        }
        if self.ladder.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(Error::config("adaptive ladder values must be positive"));
        }
        if !self.ladder.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::config("adaptive ladder must be strictly ascending"));
        }
        if !(self.gpu_budget_ms.is_finite() && self.gpu_budget_ms > 0.0) {
            return Err(Error::config(format!(
                "gpu budget must be positive, got {}",
                self.gpu_budget_ms
            )));
        }
        if self.step_up_fraction >= self.step_down_fraction {
            return Err(Error::config(
                "step_up_fraction must be below step_down_fraction",
            ));
        }
        Ok(())
    }
}

/// Outcome of one [`AdaptiveDensity::sample`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Hold,
    /// Sample recorded but ignored after a recent step down.
    Cooldown,
    /// Rungs actually moved, after clamping.
    StepUp(usize),
    StepDown(usize),
}

#[derive(Debug, Clone)]
pub struct AdaptiveDensity {
    config: AdaptiveConfig,
    /// T-2, T-1, oldest first.
    history: VecDeque<f32>,
    rung: usize,
    cooldown: u32,
}

const HISTORY_LEN: usize = 2;

impl AdaptiveDensity {
    /// Starts at the top rung.
    pub fn new(mut config: AdaptiveConfig) -> Self {
        if config.ladder.is_empty() {
            warn!("empty density ladder, pinning density to 1.0");
            config.ladder.push(1.0);
        }
        let rung = config.ladder.len() - 1;
        Self {
            config,
            history: VecDeque::with_capacity(HISTORY_LEN),
            rung,
            cooldown: 0,
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn rung(&self) -> usize {
        self.rung
    }

    pub fn density(&self) -> f32 {
        self.config.ladder[self.rung]
    }

    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.rung = self.config.ladder.len() - 1;
        self.cooldown = 0;
    }

    /// Feeds the GPU time of the latest frame and moves along the ladder.
    pub fn sample(&mut self, gpu_ms: f32) -> Adjustment {
        if !gpu_ms.is_finite() || gpu_ms < 0.0 {
            debug!("ignoring GPU time sample {}", gpu_ms);
            return Adjustment::Hold;
        }

        let adjustment = self.decide(gpu_ms);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(gpu_ms);
        adjustment
    }

    fn decide(&mut self, t0: f32) -> Adjustment {
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return Adjustment::Cooldown;
        }

        let budget = self.config.gpu_budget_ms;
        let down = self.config.step_down_fraction * budget;
        let up = self.config.step_up_fraction * budget;
        let predict = self.config.predict_fraction * budget;
        let t1 = self.history.back().copied();

        if t0 > down {
            return self.step_down(t0);
        }

        if self.history.len() == HISTORY_LEN && t0 < up && self.history.iter().all(|t| *t < up) {
            return self.step_up(t0);
        }

        if let Some(t1) = t1 {
            if t0 > predict && 2.0 * t0 - t1 > down {
                return self.step_down(t0);
            }
        }

        Adjustment::Hold
    }

    fn step_down(&mut self, gpu_ms: f32) -> Adjustment {
        let from = self.rung;
        self.rung = from.saturating_sub(self.config.step_down_rungs);
        self.cooldown = self.config.cooldown_frames;
        if self.rung != from {
            info!(
                "pixel density down {:.2} -> {:.2} (gpu {:.2}ms)",
                self.config.ladder[from],
                self.density(),
                gpu_ms
            );
        }
        Adjustment::StepDown(from - self.rung)
    }

    fn step_up(&mut self, gpu_ms: f32) -> Adjustment {
        let from = self.rung;
        let top = self.config.ladder.len() - 1;
        self.rung = (from + self.config.step_up_rungs).min(top);
        if self.rung == from {
            return Adjustment::Hold;
        }
        info!(
            "pixel density up {:.2} -> {:.2} (gpu {:.2}ms)",
            self.config.ladder[from],
            self.density(),
            gpu_ms
        );
        Adjustment::StepUp(self.rung - from)
    }
}
