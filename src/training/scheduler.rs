//! Epoch-level learning-rate schedules

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Learning rate policy, stepped once per epoch after the train phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerType {
    Constant,

    /// Multiply the LR by `gamma` every `step_size` epochs
    StepLR { step_size: usize, gamma: f64 },

    /// Cosine decay from the base LR to `eta_min` over `t_max` epochs
    CosineAnnealingLR { t_max: usize, eta_min: f64 },
}

impl Default for SchedulerType {
    fn default() -> Self {
        Self::StepLR {
            step_size: 7,
            gamma: 0.1,
        }
    }
}

pub struct LearningRateScheduler {
    scheduler_type: SchedulerType,
    base_lr: f64,
    current_lr: f64,
    current_epoch: usize,
}

impl LearningRateScheduler {
    pub fn new(scheduler_type: SchedulerType, base_lr: f64) -> Self {
        Self {
            scheduler_type,
            base_lr,
            current_lr: base_lr,
            current_epoch: 0,
        }
    }

    /// LR to use for the next train phase
    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    /// Number of completed steps
    pub fn epoch(&self) -> usize {
        self.current_epoch
    }

    /// Advance by one epoch
    pub fn step(&mut self) {
        self.current_epoch += 1;

        match &self.scheduler_type {
            SchedulerType::Constant => {}

            SchedulerType::StepLR { step_size, gamma } => {
                if *step_size > 0 && self.current_epoch % step_size == 0 {
                    self.current_lr *= gamma;
                }
            }

            SchedulerType::CosineAnnealingLR { t_max, eta_min } => {
                let progress = (self.current_epoch as f64 / (*t_max).max(1) as f64).min(1.0);
                self.current_lr = eta_min + (self.base_lr - eta_min) * (1.0 + (progress * PI).cos()) / 2.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_lr_decays_every_seven_epochs() {
        let mut scheduler = LearningRateScheduler::new(SchedulerType::default(), 1e-3);

        let mut lrs = vec![scheduler.get_lr()];
        for _ in 0..15 {
            scheduler.step();
            lrs.push(scheduler.get_lr());
        }

        assert!((lrs[6] - 1e-3).abs() < 1e-12);
        assert!((lrs[7] - 1e-4).abs() < 1e-12);
        assert!((lrs[13] - 1e-4).abs() < 1e-12);
        assert!((lrs[14] - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_constant() {
        let mut scheduler = LearningRateScheduler::new(SchedulerType::Constant, 0.01);
        for _ in 0..10 {
            scheduler.step();
        }
        assert_eq!(scheduler.get_lr(), 0.01);
        assert_eq!(scheduler.epoch(), 10);
    }

    #[test]
    fn test_cosine_reaches_minimum() {
        let mut scheduler = LearningRateScheduler::new(
            SchedulerType::CosineAnnealingLR {
                t_max: 4,
                eta_min: 1e-5,
            },
            1e-3,
        );
        for _ in 0..4 {
            scheduler.step();
        }
        assert!((scheduler.get_lr() - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_string(&SchedulerType::default()).unwrap();
        assert!(json.contains("\"type\":\"StepLR\""));
        let back: SchedulerType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SchedulerType::default());
    }
}
