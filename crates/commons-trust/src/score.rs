use commons_core::ScoreWeights;

/// Trust score as a pure function of three graph metrics.
///
/// `score = incoming * w_incoming + bidirectional * w_bidirectional
///        + w_depth / (1 + depth)`
///
/// The depth term is 0 for nodes the organisation cannot reach. The score is
/// monotone: non-decreasing in `incoming` and `bidirectional`, non-increasing
/// in `depth`. Weights come from configuration; the defaults in
/// [`ScoreWeights`] are starting points, not calibrated values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScorePolicy {
    weights: ScoreWeights,
}

impl ScorePolicy {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn score(&self, incoming: u32, bidirectional: u32, depth: Option<u32>) -> f64 {
        let w = &self.weights;
        let proximity = match depth {
            Some(d) => w.depth_proximity / (1.0 + d as f64),
            None => 0.0,
        };
        incoming as f64 * w.incoming_credential
            + bidirectional as f64 * w.bidirectional_relation
            + proximity
    }
}
