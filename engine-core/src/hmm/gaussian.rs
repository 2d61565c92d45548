use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

use super::features::FeatureVector;

const MIN_VARIANCE: f64 = 1e-6;

/// 3-state Gaussian HMM with diagonal covariances (spec.md §4.6 "Model";
/// §9 "Gaussian HMM with diagonal covariances, Baum-Welch training, and
/// forward-backward posteriors", state-label remapping kept outside this
/// type per §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GaussianHmm {
    pub n_states: usize,
    pub n_features: usize,
    /// `means[state][feature]`.
    pub means: Vec<Vec<f64>>,
    /// `variances[state][feature]`, diagonal covariance.
    pub variances: Vec<Vec<f64>>,
    /// `transition[from][to]`.
    pub transition: Vec<Vec<f64>>,
    pub initial: Vec<f64>,
}

impl GaussianHmm {
    fn emission_log_prob(&self, state: usize, obs: &FeatureVector) -> f64 {
        let mut lp = 0.0;
        for f in 0..self.n_features {
            let mean = self.means[state][f];
            let var = self.variances[state][f].max(MIN_VARIANCE);
            let std_dev = var.sqrt();
            let normal = Normal::new(mean, std_dev).expect("positive std dev");
            lp += normal.ln_pdf(obs[f]);
        }
        lp
    }

    /// Scaled forward-backward over `observations`, returning the
    /// per-timestep posterior state distribution (spec.md §9).
    pub fn forward_backward(&self, observations: &[FeatureVector]) -> Vec<Vec<f64>> {
        let t_len = observations.len();
        if t_len == 0 {
            return Vec::new();
        }
        let n = self.n_states;

        let mut alpha = vec![vec![0.0; n]; t_len];
        let mut scales = vec![0.0; t_len];

        for s in 0..n {
            alpha[0][s] = self.initial[s] * self.emission_log_prob(s, &observations[0]).exp();
        }
        scales[0] = alpha[0].iter().sum::<f64>().max(1e-300);
        for s in 0..n {
            alpha[0][s] /= scales[0];
        }

        for t in 1..t_len {
            for s in 0..n {
                let mut acc = 0.0;
                for prev in 0..n {
                    acc += alpha[t - 1][prev] * self.transition[prev][s];
                }
                alpha[t][s] = acc * self.emission_log_prob(s, &observations[t]).exp();
            }
            scales[t] = alpha[t].iter().sum::<f64>().max(1e-300);
            for s in 0..n {
                alpha[t][s] /= scales[t];
            }
        }

        let mut beta = vec![vec![1.0; n]; t_len];
        for t in (0..t_len - 1).rev() {
            for s in 0..n {
                let mut acc = 0.0;
                for next in 0..n {
                    acc += self.transition[s][next]
                        * self.emission_log_prob(next, &observations[t + 1]).exp()
                        * beta[t + 1][next];
                }
                beta[t][s] = acc / scales[t + 1];
            }
        }

        let mut posterior = vec![vec![0.0; n]; t_len];
        for t in 0..t_len {
            let mut row_sum = 0.0;
            for s in 0..n {
                posterior[t][s] = alpha[t][s] * beta[t][s];
                row_sum += posterior[t][s];
            }
            if row_sum > 0.0 {
                for s in 0..n {
                    posterior[t][s] /= row_sum;
                }
            }
        }
        posterior
    }

    /// Baum-Welch EM training (spec.md §4.6 "Training = Baum-Welch over
    /// HMM_TRAINING_CANDLES samples"). `seed` makes initialization
    /// deterministic and reproducible across retrains.
    pub fn train(observations: &[FeatureVector], n_states: usize, max_iters: usize, seed: u64) -> Self {
        let n_features = observations.first().map(|o| o.len()).unwrap_or(4);
        let mut model = Self::initialize(observations, n_states, n_features, seed);

        for _ in 0..max_iters {
            let t_len = observations.len();
            if t_len == 0 {
                break;
            }
            let gamma = model.forward_backward(observations);
            let xi = model.pairwise_posteriors(observations, &gamma);

            let mut new_initial = gamma[0].clone();
            let initial_sum: f64 = new_initial.iter().sum();
            if initial_sum > 0.0 {
                for v in &mut new_initial {
                    *v /= initial_sum;
                }
            }

            let mut new_transition = vec![vec![0.0; n_states]; n_states];
            for i in 0..n_states {
                let denom: f64 = (0..t_len - 1).map(|t| gamma[t][i]).sum::<f64>().max(1e-300);
                for j in 0..n_states {
                    let numer: f64 = (0..t_len - 1).map(|t| xi[t][i][j]).sum();
                    new_transition[i][j] = numer / denom;
                }
            }

            let mut new_means = vec![vec![0.0; n_features]; n_states];
            let mut new_vars = vec![vec![0.0; n_features]; n_states];
            for s in 0..n_states {
                let weight_sum: f64 = (0..t_len).map(|t| gamma[t][s]).sum::<f64>().max(1e-300);
                for f in 0..n_features {
                    let mean: f64 = (0..t_len).map(|t| gamma[t][s] * observations[t][f]).sum::<f64>() / weight_sum;
                    new_means[s][f] = mean;
                    let var: f64 = (0..t_len)
                        .map(|t| gamma[t][s] * (observations[t][f] - mean).powi(2))
                        .sum::<f64>()
                        / weight_sum;
                    new_vars[s][f] = var.max(MIN_VARIANCE);
                }
            }

            model.initial = new_initial;
            model.transition = new_transition;
            model.means = new_means;
            model.variances = new_vars;
        }

        model
    }

    fn pairwise_posteriors(&self, observations: &[FeatureVector], gamma: &[Vec<f64>]) -> Vec<Vec<Vec<f64>>> {
        let t_len = observations.len();
        let n = self.n_states;
        let mut xi = vec![vec![vec![0.0; n]; n]; t_len.saturating_sub(1)];
        for t in 0..t_len.saturating_sub(1) {
            let mut row_sum = 0.0;
            for i in 0..n {
                for j in 0..n {
                    let val = gamma[t][i] * self.transition[i][j]
                        * self.emission_log_prob(j, &observations[t + 1]).exp();
                    xi[t][i][j] = val;
                    row_sum += val;
                }
            }
            if row_sum > 0.0 {
                for i in 0..n {
                    for j in 0..n {
                        xi[t][i][j] /= row_sum;
                    }
                }
            }
        }
        xi
    }

    /// K-means-ish initialization: seed means from randomly chosen
    /// observations, uniform priors, near-uniform transitions (spec.md §9
    /// doesn't mandate an init scheme; this keeps EM well-conditioned).
    fn initialize(observations: &[FeatureVector], n_states: usize, n_features: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut means = Vec::with_capacity(n_states);
        if observations.is_empty() {
            for _ in 0..n_states {
                means.push(vec![0.0; n_features]);
            }
        } else {
            for _ in 0..n_states {
                let idx = rng.gen_range(0..observations.len());
                means.push(observations[idx].to_vec());
            }
        }

        let global_var = sample_variance(observations, n_features);
        let variances = (0..n_states).map(|_| global_var.clone()).collect();

        let self_weight = 0.8;
        let off_weight = (1.0 - self_weight) / (n_states.max(2) - 1) as f64;
        let transition = (0..n_states)
            .map(|i| {
                (0..n_states)
                    .map(|j| if i == j { self_weight } else { off_weight })
                    .collect()
            })
            .collect();

        let initial = vec![1.0 / n_states as f64; n_states];

        Self { n_states, n_features, means, variances, transition, initial }
    }
}

fn sample_variance(observations: &[FeatureVector], n_features: usize) -> Vec<f64> {
    if observations.is_empty() {
        return vec![1.0; n_features];
    }
    let n = observations.len() as f64;
    let mut means = vec![0.0; n_features];
    for obs in observations {
        for f in 0..n_features {
            means[f] += obs[f] / n;
        }
    }
    let mut vars = vec![0.0; n_features];
    for obs in observations {
        for f in 0..n_features {
            vars[f] += (obs[f] - means[f]).powi(2) / n;
        }
    }
    vars.iter().map(|v| v.max(MIN_VARIANCE)).collect()
}
