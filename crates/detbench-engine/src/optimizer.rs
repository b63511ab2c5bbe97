//! SGD optimizer and warmup multi-step learning-rate schedule

use detbench_config::SolverConfig;

/// SGD with momentum and L2 weight decay
#[derive(Debug, Clone)]
pub struct Sgd {
    momentum: f64,
    weight_decay: f64,
    velocity: Vec<f64>,
}

impl Sgd {
    pub fn new(num_params: usize, momentum: f64, weight_decay: f64) -> Self {
        Self {
            momentum,
            weight_decay,
            velocity: vec![0.0; num_params],
        }
    }

    /// Apply one update in place. `weights` and `grads` must have the length
    /// the optimizer was built for.
    pub fn step(&mut self, weights: &mut [f64], grads: &[f64], lr: f64) {
        assert_eq!(weights.len(), self.velocity.len());
        assert_eq!(grads.len(), self.velocity.len());
        for ((w, &g), v) in weights.iter_mut().zip(grads.iter()).zip(self.velocity.iter_mut()) {
            let g = g + self.weight_decay * *w;
            *v = self.momentum * *v + g;
            *w -= lr * *v;
        }
    }
}

/// Learning-rate schedule: linear warmup followed by step decay
///
/// The rate starts at `base_lr * warmup_factor`, ramps linearly to `base_lr`
/// over `warmup_iters`, then is multiplied by `gamma` at each milestone in
/// `steps`.
#[derive(Debug, Clone)]
pub struct WarmupMultiStepLr {
    base_lr: f64,
    warmup_factor: f64,
    warmup_iters: usize,
    gamma: f64,
    steps: Vec<usize>,
}

impl WarmupMultiStepLr {
    pub fn new(
        base_lr: f64,
        warmup_factor: f64,
        warmup_iters: usize,
        gamma: f64,
        mut steps: Vec<usize>,
    ) -> Self {
        steps.sort_unstable();
        Self { base_lr, warmup_factor, warmup_iters, gamma, steps }
    }

    pub fn from_config(solver: &SolverConfig) -> Self {
        Self::new(
            solver.base_lr,
            solver.warmup_factor,
            solver.warmup_iters,
            solver.gamma,
            solver.steps.clone(),
        )
    }

    /// Learning rate at a given iteration
    pub fn lr_at(&self, iteration: usize) -> f64 {
        let warmup = if iteration < self.warmup_iters {
            let alpha = iteration as f64 / self.warmup_iters as f64;
            self.warmup_factor * (1.0 - alpha) + alpha
        } else {
            1.0
        };
        let decays = self.steps.iter().filter(|&&s| iteration >= s).count();
        self.base_lr * warmup * self.gamma.powi(decays as i32)
    }
}
