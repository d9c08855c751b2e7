//! Deep knowledge tracing over a fixed concept curriculum.
//!
//! Each step is a `2K` one-hot vector: slot `q` when concept `q` was answered
//! correctly, slot `K + q` when incorrectly. Stacked GRU layers feed a linear
//! read-out whose sigmoid gives per-concept mastery probabilities.
//!
//! Training predicts step `t+1` from the output at step `t` (binary
//! cross-entropy on the practiced concept), backpropagated through time and
//! optimized with Adam. Inference replays one learner strictly in order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::gru::{add_assign, matvec, sigmoid, GruCache, GruLayer};
use crate::adaptive::config::TracerConfig;
use crate::adaptive::error::{AdaptiveError, AdaptiveResult};
use crate::adaptive::types::ConceptId;

const BCE_EPSILON: f64 = 1e-10;
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub concept_id: ConceptId,
    pub correct: bool,
    pub timestamp: DateTime<Utc>,
}

/// Recurrent state of one learner. Owned by the caller, never by the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracerState {
    hidden: Vec<Vec<f64>>,
    pub steps: usize,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub sequences: usize,
    pub targets: usize,
    pub initial_loss: f64,
    pub final_loss: f64,
    pub epoch_losses: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub targets: usize,
    pub loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeTracer {
    concepts: Vec<ConceptId>,
    index: HashMap<ConceptId, usize>,
    layers: Vec<GruLayer>,
    w_out: Vec<f64>,
    b_out: Vec<f64>,
    config: TracerConfig,
    trained_sequences: usize,
}

struct Gradients {
    layers: Vec<GruLayer>,
    w_out: Vec<f64>,
    b_out: Vec<f64>,
}

impl Gradients {
    fn tensors(&self) -> Vec<&Vec<f64>> {
        let mut out: Vec<&Vec<f64>> = self.layers.iter().flat_map(|l| l.tensors()).collect();
        out.push(&self.w_out);
        out.push(&self.b_out);
        out
    }

    fn scale(&mut self, factor: f64) {
        for layer in &mut self.layers {
            for tensor in layer.tensors_mut() {
                tensor.iter_mut().for_each(|v| *v *= factor);
            }
        }
        self.w_out.iter_mut().for_each(|v| *v *= factor);
        self.b_out.iter_mut().for_each(|v| *v *= factor);
    }

    fn norm(&self) -> f64 {
        self.tensors()
            .iter()
            .flat_map(|t| t.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }
}

struct Adam {
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
    t: i32,
    lr: f64,
}

impl Adam {
    fn new(shapes: &[usize], lr: f64) -> Self {
        Self {
            m: shapes.iter().map(|&n| vec![0.0; n]).collect(),
            v: shapes.iter().map(|&n| vec![0.0; n]).collect(),
            t: 0,
            lr,
        }
    }

    fn step(&mut self, params: Vec<&mut Vec<f64>>, grads: Vec<&Vec<f64>>) {
        self.t += 1;
        let bc1 = 1.0 - ADAM_BETA1.powi(self.t);
        let bc2 = 1.0 - ADAM_BETA2.powi(self.t);
        for (idx, (param, grad)) in params.into_iter().zip(grads).enumerate() {
            let m = &mut self.m[idx];
            let v = &mut self.v[idx];
            for j in 0..param.len() {
                let g = grad[j];
                m[j] = ADAM_BETA1 * m[j] + (1.0 - ADAM_BETA1) * g;
                v[j] = ADAM_BETA2 * v[j] + (1.0 - ADAM_BETA2) * g * g;
                let m_hat = m[j] / bc1;
                let v_hat = v[j] / bc2;
                param[j] -= self.lr * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
            }
        }
    }
}

impl KnowledgeTracer {
    pub fn new(concepts: Vec<ConceptId>, config: TracerConfig) -> AdaptiveResult<Self> {
        if concepts.is_empty() {
            return Err(AdaptiveError::Config("tracer curriculum is empty".into()));
        }
        if config.hidden_size == 0 || config.num_layers == 0 {
            return Err(AdaptiveError::Config(
                "tracer hidden_size and num_layers must be positive".into(),
            ));
        }

        let mut index = HashMap::new();
        let mut unique = Vec::with_capacity(concepts.len());
        for concept in concepts {
            if !index.contains_key(&concept) {
                index.insert(concept.clone(), unique.len());
                unique.push(concept);
            }
        }

        let k = unique.len();
        let h = config.hidden_size;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let layers = (0..config.num_layers)
            .map(|l| GruLayer::new(if l == 0 { 2 * k } else { h }, h, &mut rng))
            .collect();
        let bound = 1.0 / (h as f64).sqrt();
        let w_out = (0..k * h).map(|_| rng.random_range(-bound..bound)).collect();
        let b_out = vec![0.0; k];

        Ok(Self {
            concepts: unique,
            index,
            layers,
            w_out,
            b_out,
            config,
            trained_sequences: 0,
        })
    }

    pub fn concepts(&self) -> &[ConceptId] {
        &self.concepts
    }

    pub fn num_concepts(&self) -> usize {
        self.concepts.len()
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.trained_sequences > 0
    }

    pub fn concept_index(&self, concept: &str) -> Option<usize> {
        self.index.get(concept).copied()
    }

    pub fn encode(&self, concept_index: usize, correct: bool) -> Vec<f64> {
        let k = self.num_concepts();
        let mut x = vec![0.0; 2 * k];
        let slot = if correct { concept_index } else { k + concept_index };
        if slot < x.len() {
            x[slot] = 1.0;
        }
        x
    }

    pub fn initial_state(&self) -> TracerState {
        TracerState {
            hidden: vec![vec![0.0; self.config.hidden_size]; self.layers.len()],
            steps: 0,
            last_timestamp: None,
        }
    }

    /// Output is trusted once the model is trained and the learner has enough history.
    pub fn is_warm(&self, state: &TracerState) -> bool {
        self.is_trained() && state.steps >= self.config.warm_steps
    }

    /// Advances `state` by one interaction. Unknown concepts leave it untouched.
    pub fn step(
        &self,
        state: &mut TracerState,
        interaction: &Interaction,
    ) -> AdaptiveResult<Option<Vec<f64>>> {
        if let Some(last) = state.last_timestamp {
            if interaction.timestamp < last {
                return Err(AdaptiveError::OutOfOrderSequence(state.steps));
            }
        }
        let Some(q) = self.concept_index(&interaction.concept_id) else {
            return Ok(None);
        };
        let h = self.config.hidden_size;
        if state.hidden.len() != self.layers.len() || state.hidden.iter().any(|v| v.len() != h) {
            // State from a differently shaped model: start over, keep ordering.
            let last_timestamp = state.last_timestamp;
            *state = self.initial_state();
            state.last_timestamp = last_timestamp;
        }

        let mut input = self.encode(q, interaction.correct);
        for (layer, hidden) in self.layers.iter().zip(state.hidden.iter_mut()) {
            let next = layer.forward(&input, hidden);
            *hidden = next.clone();
            input = next;
        }
        state.steps += 1;
        state.last_timestamp = Some(interaction.timestamp);
        Ok(Some(self.read_out(&input)))
    }

    /// Per-concept mastery probabilities for the current state.
    pub fn predict(&self, state: &TracerState) -> Vec<f64> {
        match state.hidden.last() {
            Some(top) if top.len() == self.config.hidden_size => self.read_out(top),
            _ => self.read_out(&vec![0.0; self.config.hidden_size]),
        }
    }

    pub fn concept_probability(&self, state: &TracerState, concept: &str) -> Option<f64> {
        let q = self.concept_index(concept)?;
        Some(self.predict(state)[q])
    }

    pub fn replay(&self, sequence: &[Interaction]) -> AdaptiveResult<(TracerState, Vec<Vec<f64>>)> {
        let mut state = self.initial_state();
        let mut outputs = Vec::with_capacity(sequence.len());
        for interaction in sequence {
            if let Some(probs) = self.step(&mut state, interaction)? {
                outputs.push(probs);
            }
        }
        Ok((state, outputs))
    }

    /// Final mastery vectors for many learners; each sequence is replayed in order.
    pub fn infer_batch(&self, sequences: &[Vec<Interaction>]) -> Vec<AdaptiveResult<Vec<f64>>> {
        sequences
            .par_iter()
            .map(|seq| self.replay(seq).map(|(state, _)| self.predict(&state)))
            .collect()
    }

    fn read_out(&self, top: &[f64]) -> Vec<f64> {
        let mut logits = matvec(&self.w_out, self.num_concepts(), self.config.hidden_size, top);
        add_assign(&mut logits, &self.b_out);
        logits.into_iter().map(sigmoid).collect()
    }

    fn indexed(&self, sequence: &[Interaction]) -> Vec<(usize, bool)> {
        sequence
            .iter()
            .filter_map(|i| self.concept_index(&i.concept_id).map(|q| (q, i.correct)))
            .collect()
    }

    fn zero_gradients(&self) -> Gradients {
        Gradients {
            layers: self.layers.iter().map(GruLayer::zeros_like).collect(),
            w_out: vec![0.0; self.w_out.len()],
            b_out: vec![0.0; self.b_out.len()],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Vec<f64>> {
        let mut out: Vec<&mut Vec<f64>> = self
            .layers
            .iter_mut()
            .flat_map(|l| l.tensors_mut())
            .collect();
        out.push(&mut self.w_out);
        out.push(&mut self.b_out);
        out
    }

    /// Forward + backward over one indexed sequence. Returns `(loss_sum, targets)`.
    fn accumulate(&self, seq: &[(usize, bool)], grads: &mut Gradients) -> (f64, usize) {
        if seq.len() < 2 {
            return (0.0, 0);
        }
        let h = self.config.hidden_size;
        let depth = self.layers.len();
        let steps = seq.len() - 1;

        let mut hidden = vec![vec![0.0; h]; depth];
        let mut caches: Vec<Vec<GruCache>> = Vec::with_capacity(steps);
        let mut tops: Vec<Vec<f64>> = Vec::with_capacity(steps);
        let mut d_logits: Vec<(usize, f64)> = Vec::with_capacity(steps);
        let mut loss = 0.0;

        for t in 0..steps {
            let (q, correct) = seq[t];
            let mut input = self.encode(q, correct);
            let mut step_caches = Vec::with_capacity(depth);
            for (l, layer) in self.layers.iter().enumerate() {
                let (next, cache) = layer.forward_cached(&input, &hidden[l]);
                step_caches.push(cache);
                hidden[l] = next.clone();
                input = next;
            }

            let (target_q, target) = seq[t + 1];
            let row = &self.w_out[target_q * h..(target_q + 1) * h];
            let logit = row.iter().zip(&input).map(|(w, x)| w * x).sum::<f64>()
                + self.b_out[target_q];
            let p = sigmoid(logit).clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
            let y = if target { 1.0 } else { 0.0 };
            loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();

            d_logits.push((target_q, sigmoid(logit) - y));
            caches.push(step_caches);
            tops.push(input);
        }

        let mut dh_next = vec![vec![0.0; h]; depth];
        for t in (0..steps).rev() {
            let (q, d_logit) = d_logits[t];
            let row = &self.w_out[q * h..(q + 1) * h];
            let grad_row = &mut grads.w_out[q * h..(q + 1) * h];
            for k in 0..h {
                grad_row[k] += d_logit * tops[t][k];
            }
            grads.b_out[q] += d_logit;

            let mut d_from_above: Vec<f64> = row.iter().map(|w| w * d_logit).collect();
            for l in (0..depth).rev() {
                let mut dh = dh_next[l].clone();
                add_assign(&mut dh, &d_from_above);
                let (dx, dh_prev) = self.layers[l].backward(&caches[t][l], &dh, &mut grads.layers[l]);
                dh_next[l] = dh_prev;
                d_from_above = dx;
            }
        }

        (loss, steps)
    }

    /// Offline fit on complete learner sequences.
    pub fn train(&mut self, sequences: &[Vec<Interaction>]) -> TrainingReport {
        let data: Vec<Vec<(usize, bool)>> = sequences
            .iter()
            .map(|s| self.indexed(s))
            .filter(|s| s.len() >= 2)
            .collect();
        let initial_loss = self.loss_on(&data).0;

        let shapes: Vec<usize> = self.zero_gradients().tensors().iter().map(|t| t.len()).collect();
        let mut adam = Adam::new(&shapes, self.config.learning_rate);
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let mut order: Vec<usize> = (0..data.len()).collect();
        let batch_size = self.config.batch_size.max(1);
        let mut epoch_losses = Vec::with_capacity(self.config.epochs);
        let mut total_targets = 0;

        for epoch in 0..self.config.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            let mut epoch_targets = 0;

            for chunk in order.chunks(batch_size) {
                let mut grads = self.zero_gradients();
                let mut batch_loss = 0.0;
                let mut batch_targets = 0;
                for &idx in chunk {
                    let (loss, targets) = self.accumulate(&data[idx], &mut grads);
                    batch_loss += loss;
                    batch_targets += targets;
                }
                if batch_targets == 0 {
                    continue;
                }
                grads.scale(1.0 / batch_targets as f64);
                let norm = grads.norm();
                if norm > self.config.grad_clip && norm.is_finite() {
                    grads.scale(self.config.grad_clip / norm);
                }
                adam.step(self.parameters_mut(), grads.tensors());

                epoch_loss += batch_loss;
                epoch_targets += batch_targets;
            }

            let mean = if epoch_targets > 0 {
                epoch_loss / epoch_targets as f64
            } else {
                0.0
            };
            tracing::debug!(epoch, loss = mean, "knowledge tracer epoch");
            epoch_losses.push(mean);
            total_targets = epoch_targets;
        }

        self.trained_sequences += data.len();
        let final_loss = self.loss_on(&data).0;
        tracing::info!(
            sequences = data.len(),
            epochs = self.config.epochs,
            initial_loss,
            final_loss,
            "knowledge tracer trained"
        );

        TrainingReport {
            epochs: self.config.epochs,
            sequences: data.len(),
            targets: total_targets,
            initial_loss,
            final_loss,
            epoch_losses,
        }
    }

    /// Next-step prediction quality on held-out sequences.
    pub fn evaluate(&self, sequences: &[Vec<Interaction>]) -> EvaluationReport {
        let data: Vec<Vec<(usize, bool)>> = sequences.iter().map(|s| self.indexed(s)).collect();
        let (loss, targets, correct) = self.loss_on(&data);
        EvaluationReport {
            targets,
            loss,
            accuracy: if targets > 0 {
                correct as f64 / targets as f64
            } else {
                0.0
            },
        }
    }

    /// Mean BCE, target count and number of correct thresholded predictions.
    fn loss_on(&self, data: &[Vec<(usize, bool)>]) -> (f64, usize, usize) {
        let (loss, targets, hits) = data
            .par_iter()
            .map(|seq| {
                let mut state = self.initial_state();
                let mut loss = 0.0;
                let mut targets = 0;
                let mut hits = 0;
                for window in seq.windows(2) {
                    let (q, correct) = window[0];
                    let mut input = self.encode(q, correct);
                    for (layer, hidden) in self.layers.iter().zip(state.hidden.iter_mut()) {
                        *hidden = layer.forward(&input, hidden);
                        input = hidden.clone();
                    }
                    let (target_q, target) = window[1];
                    let p = self.read_out(&input)[target_q].clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
                    loss -= if target { p.ln() } else { (1.0 - p).ln() };
                    targets += 1;
                    if (p >= 0.5) == target {
                        hits += 1;
                    }
                }
                (loss, targets, hits)
            })
            .reduce(|| (0.0, 0, 0), |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2));
        let mean = if targets > 0 { loss / targets as f64 } else { 0.0 };
        (mean, targets, hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn concepts() -> Vec<ConceptId> {
        vec!["add".into(), "sub".into(), "mul".into()]
    }

    fn small_config() -> TracerConfig {
        TracerConfig {
            hidden_size: 8,
            num_layers: 2,
            learning_rate: 0.05,
            epochs: 40,
            batch_size: 4,
            warm_steps: 2,
            ..Default::default()
        }
    }

    fn sequence(pattern: &[(&str, bool)]) -> Vec<Interaction> {
        let start = Utc::now();
        pattern
            .iter()
            .enumerate()
            .map(|(i, (concept, correct))| Interaction {
                concept_id: concept.to_string(),
                correct: *correct,
                timestamp: start + Duration::minutes(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_encoding_layout() {
        let tracer = KnowledgeTracer::new(concepts(), small_config()).unwrap();
        let x = tracer.encode(1, true);
        assert_eq!(x.len(), 6);
        assert_eq!(x[1], 1.0);
        let x = tracer.encode(1, false);
        assert_eq!(x[4], 1.0);
        assert_eq!(x.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_outputs_are_probabilities() {
        let tracer = KnowledgeTracer::new(concepts(), small_config()).unwrap();
        let seq = sequence(&[("add", true), ("sub", false), ("mul", true), ("add", false)]);
        let (state, outputs) = tracer.replay(&seq).unwrap();
        assert_eq!(state.steps, 4);
        assert_eq!(outputs.len(), 4);
        for probs in outputs {
            assert_eq!(probs.len(), 3);
            assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_out_of_order_rejected() {
        let tracer = KnowledgeTracer::new(concepts(), small_config()).unwrap();
        let mut seq = sequence(&[("add", true), ("sub", true)]);
        seq.swap(0, 1);
        match tracer.replay(&seq) {
            Err(AdaptiveError::OutOfOrderSequence(step)) => assert_eq!(step, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_concept_is_skipped() {
        let tracer = KnowledgeTracer::new(concepts(), small_config()).unwrap();
        let mut state = tracer.initial_state();
        let seq = sequence(&[("geometry", true)]);
        assert!(tracer.step(&mut state, &seq[0]).unwrap().is_none());
        assert_eq!(state.steps, 0);
    }

    #[test]
    fn test_rejects_empty_curriculum() {
        assert!(KnowledgeTracer::new(Vec::new(), small_config()).is_err());
    }

    #[test]
    fn test_training_learns_concept_difficulty() {
        let mut tracer = KnowledgeTracer::new(concepts(), small_config()).unwrap();
        assert!(!tracer.is_trained());
        let sequences: Vec<Vec<Interaction>> = (0..16)
            .map(|i| {
                let mut pattern = Vec::new();
                for j in 0..10 {
                    if (i + j) % 2 == 0 {
                        pattern.push(("add", true));
                    } else {
                        pattern.push(("sub", false));
                    }
                }
                sequence(&pattern)
            })
            .collect();

        let report = tracer.train(&sequences);
        assert!(tracer.is_trained());
        assert!(report.final_loss < report.initial_loss);

        let probe = sequence(&[("add", true), ("sub", false), ("add", true)]);
        let (state, _) = tracer.replay(&probe).unwrap();
        let add = tracer.concept_probability(&state, "add").unwrap();
        let sub = tracer.concept_probability(&state, "sub").unwrap();
        assert!(add > sub, "add = {add}, sub = {sub}");
        assert!(tracer.is_warm(&state));

        let eval = tracer.evaluate(&sequences);
        assert!(eval.accuracy > 0.9);
    }

    #[test]
    fn test_batch_inference_matches_replay() {
        let tracer = KnowledgeTracer::new(concepts(), small_config()).unwrap();
        let a = sequence(&[("add", true), ("mul", false)]);
        let b = sequence(&[("sub", true)]);
        let batch = tracer.infer_batch(&[a.clone(), b.clone()]);
        let (state_a, _) = tracer.replay(&a).unwrap();
        let (state_b, _) = tracer.replay(&b).unwrap();
        assert_eq!(batch[0].as_ref().unwrap(), &tracer.predict(&state_a));
        assert_eq!(batch[1].as_ref().unwrap(), &tracer.predict(&state_b));
    }

    #[test]
    fn test_model_round_trips_through_json() {
        let tracer = KnowledgeTracer::new(concepts(), small_config()).unwrap();
        let json = serde_json::to_string(&tracer).unwrap();
        let restored: KnowledgeTracer = serde_json::from_str(&json).unwrap();
        let seq = sequence(&[("add", true), ("sub", false)]);
        let (sa, _) = tracer.replay(&seq).unwrap();
        let (sb, _) = restored.replay(&seq).unwrap();
        assert_eq!(tracer.predict(&sa), restored.predict(&sb));
    }
}
