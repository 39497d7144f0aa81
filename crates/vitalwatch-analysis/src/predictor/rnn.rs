//! Elman recurrent network trained with backpropagation through time
//!
//! h_t = tanh(W_xh x_t + W_hh h_{t-1} + b_h), y = W_hy h_T + b_y
//! Weights are row-major flat vectors. Optimiser is Adam over mini-batches,
//! loss is mean squared error in scaled space.

use super::window::Sample;
use crate::error::AnalysisError;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

const CLIP_NORM: f64 = 5.0;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentNet {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    w_xh: Vec<f64>,
    w_hh: Vec<f64>,
    b_h: Vec<f64>,
    w_hy: Vec<f64>,
    b_y: Vec<f64>,
}

impl RecurrentNet {
    /// Uniform(-1/sqrt(hidden), 1/sqrt(hidden)) initialisation
    pub fn new(input_size: usize, hidden_size: usize, output_size: usize, rng: &mut StdRng) -> Self {
        let k = 1.0 / (hidden_size as f64).sqrt();
        let mut init = |n: usize| -> Vec<f64> {
            (0..n).map(|_| rng.random_range(-k..k)).collect()
        };
        Self {
            input_size,
            hidden_size,
            output_size,
            w_xh: init(hidden_size * input_size),
            w_hh: init(hidden_size * hidden_size),
            b_h: vec![0.0; hidden_size],
            w_hy: init(output_size * hidden_size),
            b_y: vec![0.0; output_size],
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            output_size: self.output_size,
            w_xh: vec![0.0; self.w_xh.len()],
            w_hh: vec![0.0; self.w_hh.len()],
            b_h: vec![0.0; self.b_h.len()],
            w_hy: vec![0.0; self.w_hy.len()],
            b_y: vec![0.0; self.b_y.len()],
        }
    }

    fn tensors(&self) -> [&Vec<f64>; 5] {
        [&self.w_xh, &self.w_hh, &self.b_h, &self.w_hy, &self.b_y]
    }

    fn tensors_mut(&mut self) -> [&mut Vec<f64>; 5] {
        [&mut self.w_xh, &mut self.w_hh, &mut self.b_h, &mut self.w_hy, &mut self.b_y]
    }

    /// True when every weight tensor has the length its declared sizes imply
    pub fn is_consistent(&self) -> bool {
        let (i, h, o) = (self.input_size, self.hidden_size, self.output_size);
        self.w_xh.len() == h * i
            && self.w_hh.len() == h * h
            && self.b_h.len() == h
            && self.w_hy.len() == o * h
            && self.b_y.len() == o
    }

    // hidden states h_0 (zeros) ..= h_T
    fn hidden_states(&self, window: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let h = self.hidden_size;
        let mut states = Vec::with_capacity(window.len() + 1);
        states.push(vec![0.0; h]);

        for x in window {
            let prev = states.last().map(Vec::as_slice).unwrap_or(&[]);
            let next: Vec<f64> = (0..h)
                .map(|j| {
                    let mut a = self.b_h[j];
                    for (k, xk) in x.iter().enumerate() {
                        a += self.w_xh[j * self.input_size + k] * xk;
                    }
                    for (k, hk) in prev.iter().enumerate() {
                        a += self.w_hh[j * h + k] * hk;
                    }
                    a.tanh()
                })
                .collect();
            states.push(next);
        }
        states
    }

    fn output(&self, last: &[f64]) -> Vec<f64> {
        (0..self.output_size)
            .map(|o| {
                let row = &self.w_hy[o * self.hidden_size..(o + 1) * self.hidden_size];
                self.b_y[o] + row.iter().zip(last).map(|(w, h)| w * h).sum::<f64>()
            })
            .collect()
    }

    /// Forward pass over a window of scaled metric vectors
    pub fn forward(&self, window: &[Vec<f64>]) -> Vec<f64> {
        let states = self.hidden_states(window);
        self.output(states.last().map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Accumulate the gradient of one sample's loss into `grad`; returns the loss
    fn backprop(&self, sample: &Sample, grad: &mut RecurrentNet) -> f64 {
        let (h, n_in) = (self.hidden_size, self.input_size);
        let states = self.hidden_states(&sample.input);
        let last = &states[states.len() - 1];
        let y = self.output(last);

        let n_out = self.output_size as f64;
        let dy: Vec<f64> = y
            .iter()
            .zip(&sample.target)
            .map(|(p, t)| 2.0 * (p - t) / n_out)
            .collect();
        let loss = y
            .iter()
            .zip(&sample.target)
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f64>()
            / n_out;

        // output layer
        let mut dh = vec![0.0; h];
        for (o, d) in dy.iter().enumerate() {
            grad.b_y[o] += d;
            for j in 0..h {
                grad.w_hy[o * h + j] += d * last[j];
                dh[j] += self.w_hy[o * h + j] * d;
            }
        }

        // back through time
        for t in (1..states.len()).rev() {
            let (h_t, h_prev, x_t) = (&states[t], &states[t - 1], &sample.input[t - 1]);
            let da: Vec<f64> = (0..h).map(|j| dh[j] * (1.0 - h_t[j] * h_t[j])).collect();

            let mut dh_prev = vec![0.0; h];
            for j in 0..h {
                grad.b_h[j] += da[j];
                for k in 0..n_in {
                    grad.w_xh[j * n_in + k] += da[j] * x_t[k];
                }
                for k in 0..h {
                    grad.w_hh[j * h + k] += da[j] * h_prev[k];
                    dh_prev[k] += self.w_hh[j * h + k] * da[j];
                }
            }
            dh = dh_prev;
        }
        loss
    }

    /// Mean loss over samples, no gradients
    pub fn evaluate(&self, samples: &[Sample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let total: f64 = samples
            .iter()
            .map(|s| {
                let y = self.forward(&s.input);
                y.iter().zip(&s.target).map(|(p, t)| (p - t) * (p - t)).sum::<f64>() / y.len() as f64
            })
            .sum();
        total / samples.len() as f64
    }
}

struct Adam {
    m: RecurrentNet,
    v: RecurrentNet,
    step: i32,
    learning_rate: f64,
}

impl Adam {
    fn new(net: &RecurrentNet, learning_rate: f64) -> Self {
        Self {
            m: net.zeros_like(),
            v: net.zeros_like(),
            step: 0,
            learning_rate,
        }
    }

    fn apply(&mut self, net: &mut RecurrentNet, grad: &RecurrentNet) {
        self.step += 1;
        let bias1 = 1.0 - BETA1.powi(self.step);
        let bias2 = 1.0 - BETA2.powi(self.step);

        let params = net.tensors_mut();
        let grads = grad.tensors();
        let ms = self.m.tensors_mut();
        let vs = self.v.tensors_mut();

        for (((p, g), m), v) in params.into_iter().zip(grads).zip(ms).zip(vs) {
            for i in 0..p.len() {
                m[i] = BETA1 * m[i] + (1.0 - BETA1) * g[i];
                v[i] = BETA2 * v[i] + (1.0 - BETA2) * g[i] * g[i];
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                p[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPS);
            }
        }
    }
}

/// Loss figures for one epoch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochLoss {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
}

pub(crate) struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub patience: Option<usize>,
    pub deadline: Option<(Instant, std::time::Duration)>,
}

pub(crate) struct FitOutcome {
    pub epochs: Vec<EpochLoss>,
    pub best_epoch: usize,
    pub stopped_early: bool,
}

/// Train in place. With validation samples, the weights of the best
/// validation epoch are restored at the end.
pub(crate) fn fit(
    net: &mut RecurrentNet,
    train: &[Sample],
    val: &[Sample],
    opts: &FitOptions,
    rng: &mut StdRng,
) -> Result<FitOutcome, AnalysisError> {
    let mut adam = Adam::new(net, opts.learning_rate);
    let mut order: Vec<usize> = (0..train.len()).collect();

    let mut history = Vec::with_capacity(opts.epochs);
    let mut best: Option<(f64, usize, RecurrentNet)> = None;
    let mut since_best = 0;
    let mut stopped_early = false;

    for epoch in 1..=opts.epochs {
        order.shuffle(rng);
        let mut epoch_loss = 0.0;

        for batch in order.chunks(opts.batch_size) {
            if let Some((started, limit)) = opts.deadline {
                if started.elapsed() > limit {
                    return Err(AnalysisError::TrainingTimeout {
                        elapsed: started.elapsed(),
                        epochs_completed: epoch - 1,
                    });
                }
            }

            let mut grad = net.zeros_like();
            for &i in batch {
                epoch_loss += net.backprop(&train[i], &mut grad);
            }
            scale_and_clip(&mut grad, batch.len());
            adam.apply(net, &grad);
        }

        let train_loss = epoch_loss / train.len().max(1) as f64;
        let val_loss = (!val.is_empty()).then(|| net.evaluate(val));
        debug!(epoch, train_loss, ?val_loss, "epoch finished");
        history.push(EpochLoss {
            epoch,
            train_loss,
            val_loss,
        });

        let Some(current) = val_loss else {
            continue;
        };
        match &best {
            Some((best_loss, _, _)) if current >= *best_loss => since_best += 1,
            _ => {
                best = Some((current, epoch, net.clone()));
                since_best = 0;
            }
        }
        if opts.patience.is_some_and(|p| p > 0 && since_best >= p) {
            stopped_early = true;
            break;
        }
    }

    let best_epoch = match best {
        Some((_, epoch, weights)) => {
            *net = weights;
            epoch
        }
        None => history.len(),
    };

    Ok(FitOutcome {
        epochs: history,
        best_epoch,
        stopped_early,
    })
}

// average over the batch, then clip by global norm
fn scale_and_clip(grad: &mut RecurrentNet, batch_len: usize) {
    let scale = 1.0 / batch_len.max(1) as f64;
    let mut norm_sq = 0.0;
    for t in grad.tensors_mut() {
        for g in t.iter_mut() {
            *g *= scale;
            norm_sq += *g * *g;
        }
    }
    let norm = norm_sq.sqrt();
    if norm > CLIP_NORM {
        let shrink = CLIP_NORM / norm;
        for t in grad.tensors_mut() {
            t.iter_mut().for_each(|g| *g *= shrink);
        }
    }
}
