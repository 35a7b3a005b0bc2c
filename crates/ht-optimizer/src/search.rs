//! Search space definitions and parameter sampling strategies.

use std::collections::{BTreeMap, HashSet};

use ht_types::SearchError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::trial::ObjectiveDirection;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Key handed to the evaluated binary (e.g. "train_learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
    /// Not sampled; merged verbatim into every trial.
    Constant { value: ParameterValue },
}

impl ParameterKind {
    /// Whether `value` lies in the declared domain.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::FloatRange { low, high }, ParameterValue::Float(v))
            | (Self::LogUniform { low, high }, ParameterValue::Float(v)) => {
                *v >= *low && *v <= *high
            }
            (Self::IntRange { low, high }, ParameterValue::Int(v)) => *v >= *low && *v <= *high,
            (Self::Choice { values }, ParameterValue::Json(v)) => values.contains(v),
            (Self::Constant { value: expected }, actual) => expected == actual,
            _ => false,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant { .. })
    }
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Json(v) => v.as_i64(),
            Self::Float(_) => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One concrete assignment, keyed by parameter name. Ordered so that
/// encoded payloads are stable.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::FloatRange { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.push(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.push(name, ParameterKind::Choice { values })
    }

    /// Categorical over `2^low_exp ..= 2^high_exp`.
    pub fn add_power_of_two_choice(
        self,
        name: impl Into<String>,
        low_exp: u32,
        high_exp: u32,
    ) -> Self {
        let values = (low_exp..=high_exp)
            .map(|exp| serde_json::Value::from(1_i64 << exp))
            .collect();
        self.add_choice(name, values)
    }

    pub fn add_constant(self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.push(name, ParameterKind::Constant { value })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameters a strategy has to sample (everything except constants).
    pub fn sampled(&self) -> impl Iterator<Item = &ParameterDef> {
        self.parameters.iter().filter(|p| !p.kind.is_constant())
    }

    /// Reject malformed definitions before any trial runs.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.parameters.is_empty() {
            return Err(SearchError::Empty);
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(SearchError::DuplicateParameter {
                    name: param.name.clone(),
                });
            }

            match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    check_range(&param.name, *low, *high)?;
                }
                ParameterKind::LogUniform { low, high } => {
                    check_range(&param.name, *low, *high)?;
                    if *low <= 0.0 {
                        return Err(SearchError::NonPositiveLogBound {
                            name: param.name.clone(),
                            low: *low,
                        });
                    }
                }
                ParameterKind::IntRange { low, high } => {
                    check_range(&param.name, *low as f64, *high as f64)?;
                }
                ParameterKind::Choice { values } if values.is_empty() => {
                    return Err(SearchError::EmptyChoice {
                        name: param.name.clone(),
                    });
                }
                ParameterKind::Choice { .. } | ParameterKind::Constant { .. } => {}
            }
        }
        Ok(())
    }

    /// Build the full assignment for one trial: every sampled key must be
    /// present and in its domain, constants are merged in, and keys the space
    /// does not declare are dropped.
    pub fn materialize(&self, sampled: &ParameterSet) -> Result<ParameterSet, SearchError> {
        let mut full = ParameterSet::new();
        for param in &self.parameters {
            let value = match &param.kind {
                ParameterKind::Constant { value } => value.clone(),
                kind => {
                    let value = sampled.get(&param.name).cloned().ok_or_else(|| {
                        SearchError::MissingParameter {
                            name: param.name.clone(),
                        }
                    })?;
                    if !kind.contains(&value) {
                        return Err(SearchError::OutOfDomain {
                            name: param.name.clone(),
                            value: value.to_string(),
                        });
                    }
                    value
                }
            };
            full.insert(param.name.clone(), value);
        }
        Ok(full)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn check_range(name: &str, low: f64, high: f64) -> Result<(), SearchError> {
    if !low.is_finite() || !high.is_finite() || !(high - low).is_finite() {
        return Err(SearchError::NonFiniteRange {
            name: name.to_string(),
            low,
            high,
        });
    }
    if low > high {
        return Err(SearchError::InvalidRange {
            name: name.to_string(),
            low,
            high,
        });
    }
    Ok(())
}

/// Draw one value for `kind`. Constants are not sampled.
fn sample_kind(kind: &ParameterKind, rng: &mut StdRng) -> Option<ParameterValue> {
    let value = match kind {
        ParameterKind::FloatRange { low, high } => {
            ParameterValue::Float(rng.random_range(*low..=*high))
        }
        ParameterKind::IntRange { low, high } => {
            ParameterValue::Int(rng.random_range(*low..=*high))
        }
        ParameterKind::LogUniform { low, high } => {
            let log_val: f64 = rng.random_range(low.ln()..=high.ln());
            // exp(ln(x)) can overshoot the bound by an ulp
            ParameterValue::Float(log_val.exp().clamp(*low, *high))
        }
        ParameterKind::Choice { values } => {
            let idx = rng.random_range(0..values.len());
            ParameterValue::Json(values[idx].clone())
        }
        ParameterKind::Constant { .. } => return None,
    };
    Some(value)
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter assignments to evaluate.
    /// Constants are left out; the study merges them in.
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet>;

    /// Report a scored trial so adaptive strategies can learn. Pruned trials
    /// are never reported.
    fn report(&mut self, _params: &ParameterSet, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Strategy selector carried by an optimization config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Random,
    Bayesian,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Bayesian
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self {
            space,
            rng: rng_from(None),
        }
    }

    pub fn with_seed(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: rng_from(Some(seed)),
        }
    }

    fn sample_one(&mut self) -> ParameterSet {
        let mut params = ParameterSet::new();
        for param in &self.space.parameters {
            if let Some(value) = sample_kind(&param.kind, &mut self.rng) {
                params.insert(param.name.clone(), value);
            }
        }
        params
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (surrogate-free heuristic) ----

/// Adaptive search that biases sampling toward promising regions.
///
/// Observed (params, objective) pairs are ranked by the study direction. With
/// probability `exploration_weight` a fresh random point is drawn; otherwise
/// a random member of the best `gamma` fraction is perturbed locally.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    observations: Vec<(ParameterSet, f64)>,
    exploration_weight: f64,
    gamma: f64,
    direction: ObjectiveDirection,
    rng: StdRng,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64, direction: ObjectiveDirection) -> Self {
        Self {
            space,
            observations: Vec::new(),
            exploration_weight: exploration_weight.clamp(0.0, 1.0),
            gamma: 0.25,
            direction,
            rng: rng_from(None),
        }
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(f64::EPSILON, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = rng_from(Some(seed));
        self
    }

    pub fn observations(&self) -> usize {
        self.observations.len()
    }

    fn explore(&mut self) -> ParameterSet {
        let mut params = ParameterSet::new();
        for param in &self.space.parameters {
            if let Some(value) = sample_kind(&param.kind, &mut self.rng) {
                params.insert(param.name.clone(), value);
            }
        }
        params
    }

    /// Pick a base point among the best `gamma` fraction of observations.
    fn elite(&mut self) -> Option<ParameterSet> {
        if self.observations.is_empty() {
            return None;
        }

        let direction = self.direction;
        let mut ranked: Vec<&(ParameterSet, f64)> = self.observations.iter().collect();
        ranked.sort_by(|a, b| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
            match direction {
                ObjectiveDirection::Minimize => ord,
                ObjectiveDirection::Maximize => ord.reverse(),
            }
        });

        let n_elite = ((ranked.len() as f64 * self.gamma).ceil() as usize).clamp(1, ranked.len());
        let pick = self.rng.random_range(0..n_elite);
        Some(ranked[pick].0.clone())
    }

    /// Exploitation: perturb an elite point.
    fn exploit(&mut self) -> ParameterSet {
        let base = match self.elite() {
            Some(base) => base,
            None => return self.explore(),
        };

        let mut perturbed = ParameterSet::new();
        for param in &self.space.parameters {
            let rng = &mut self.rng;
            let value = match (&param.kind, base.get(&param.name)) {
                (ParameterKind::Constant { .. }, _) => continue,
                (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = rng.random_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = rng.random_range(-2..=2);
                    ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let log_range = high.ln() - low.ln();
                    let noise = rng.random_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                (ParameterKind::Choice { values }, Some(ParameterValue::Json(v))) => {
                    match values.iter().position(|candidate| candidate == v) {
                        Some(idx) => {
                            let step: i64 = rng.random_range(-1..=1);
                            let next = (idx as i64 + step).clamp(0, values.len() as i64 - 1);
                            ParameterValue::Json(values[next as usize].clone())
                        }
                        None => {
                            let idx = rng.random_range(0..values.len());
                            ParameterValue::Json(values[idx].clone())
                        }
                    }
                }
                (kind, _) => match sample_kind(kind, rng) {
                    Some(value) => value,
                    None => continue,
                },
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count)
            .map(|_| {
                if self.observations.is_empty()
                    || self.rng.random::<f64>() < self.exploration_weight
                {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &ParameterSet, objective: f64) {
        if objective.is_finite() {
            self.observations.push((params.clone(), objective));
        }
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("cycles", 5, 15)
            .add_float("temperature", 0.3, 1.0)
            .add_power_of_two_choice("batch_size", 3, 8)
            .add_constant("eval_size", ParameterValue::Int(200))
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = sample_space();
        let mut rs = RandomSearch::with_seed(space.clone(), 7);
        let suggestions = rs.suggest(200);
        assert_eq!(suggestions.len(), 200);

        for params in &suggestions {
            match params.get("cycles") {
                Some(ParameterValue::Int(v)) => assert!(*v >= 5 && *v <= 15),
                other => panic!("unexpected cycles value: {other:?}"),
            }
            match params.get("temperature") {
                Some(ParameterValue::Float(v)) => assert!(*v >= 0.3 && *v <= 1.0),
                other => panic!("unexpected temperature value: {other:?}"),
            }
            let batch = params.get("batch_size").and_then(ParameterValue::as_i64);
            assert!(matches!(batch, Some(8 | 16 | 32 | 64 | 128 | 256)), "{batch:?}");
            // constants are left to the study
            assert!(!params.contains_key("eval_size"));
        }
    }

    #[test]
    fn power_of_two_choice_lists_every_exponent() {
        let space = SearchSpace::new().add_power_of_two_choice("epochs", 0, 8);
        match &space.parameters[0].kind {
            ParameterKind::Choice { values } => {
                let ints: Vec<i64> = values.iter().filter_map(|v| v.as_i64()).collect();
                assert_eq!(ints, vec![1, 2, 4, 8, 16, 32, 64, 128, 256]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn seeded_random_search_is_reproducible() {
        let mut a = RandomSearch::with_seed(sample_space(), 42);
        let mut b = RandomSearch::with_seed(sample_space(), 42);
        assert_eq!(a.suggest(5), b.suggest(5));
    }

    #[test]
    fn bayesian_search_starts_with_exploration() {
        let mut bs = BayesianSearch::new(sample_space(), 0.3, ObjectiveDirection::Minimize);
        let suggestions = bs.suggest(10);
        assert_eq!(suggestions.len(), 10);
        assert_eq!(bs.observations(), 0);
    }

    #[test]
    fn bayesian_search_exploits_near_best_when_minimizing() {
        let space = SearchSpace::new().add_float("lr", 0.0, 1.0);
        // exploration_weight=0 and a tiny gamma → always perturb the single best point
        let mut bs = BayesianSearch::new(space, 0.0, ObjectiveDirection::Minimize)
            .with_gamma(0.01)
            .with_seed(3);

        let mut good = ParameterSet::new();
        good.insert("lr".to_string(), ParameterValue::Float(0.2));
        let mut bad = ParameterSet::new();
        bad.insert("lr".to_string(), ParameterValue::Float(0.9));
        bs.report(&good, 0.1);
        bs.report(&bad, 5.0);

        for params in &bs.suggest(50) {
            match params.get("lr") {
                Some(ParameterValue::Float(v)) => {
                    assert!((*v - 0.2).abs() <= 0.1 + 1e-12, "lr drifted: {v}")
                }
                other => panic!("unexpected lr value: {other:?}"),
            }
        }
    }

    #[test]
    fn bayesian_choice_perturbation_stays_in_set() {
        let space = SearchSpace::new().add_power_of_two_choice("games", 5, 11);
        let mut bs = BayesianSearch::new(space.clone(), 0.0, ObjectiveDirection::Minimize)
            .with_seed(11);
        let mut base = ParameterSet::new();
        base.insert("games".to_string(), ParameterValue::Json(serde_json::json!(2048)));
        bs.report(&base, 1.0);

        let kind = &space.parameters[0].kind;
        for params in &bs.suggest(50) {
            let value = params.get("games").expect("games sampled");
            assert!(kind.contains(value));
            // only 1024 or 2048 are reachable from the top of the set
            assert!(matches!(value.as_i64(), Some(1024 | 2048)));
        }
    }

    #[test]
    fn bayesian_ignores_non_finite_reports() {
        let mut bs = BayesianSearch::new(sample_space(), 0.0, ObjectiveDirection::Minimize);
        bs.report(&ParameterSet::new(), f64::NAN);
        assert_eq!(bs.observations(), 0);
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let space = SearchSpace::new().add_log_uniform("l2", 1e-10, 1e-2);
        let mut rs = RandomSearch::new(space);
        for params in &rs.suggest(500) {
            match params.get("l2") {
                Some(ParameterValue::Float(v)) => {
                    assert!(*v >= 1e-10 && *v <= 1e-2, "l2 out of bounds: {v}");
                }
                other => panic!("unexpected l2 value: {other:?}"),
            }
        }
    }

    #[test]
    fn validate_rejects_bad_definitions() {
        assert!(matches!(
            SearchSpace::new().validate(),
            Err(SearchError::Empty)
        ));
        assert!(matches!(
            SearchSpace::new().add_float("x", 1.0, 0.0).validate(),
            Err(SearchError::InvalidRange { .. })
        ));
        assert!(matches!(
            SearchSpace::new().add_float("x", 0.0, f64::INFINITY).validate(),
            Err(SearchError::NonFiniteRange { .. })
        ));
        assert!(matches!(
            SearchSpace::new().add_float("x", f64::NAN, 1.0).validate(),
            Err(SearchError::NonFiniteRange { .. })
        ));
        assert!(matches!(
            SearchSpace::new().add_float("x", -f64::MAX, f64::MAX).validate(),
            Err(SearchError::NonFiniteRange { .. })
        ));
        assert!(matches!(
            SearchSpace::new().add_log_uniform("x", 1e-3, f64::INFINITY).validate(),
            Err(SearchError::NonFiniteRange { .. })
        ));
        assert!(matches!(
            SearchSpace::new().add_log_uniform("x", 0.0, 1.0).validate(),
            Err(SearchError::NonPositiveLogBound { .. })
        ));
        assert!(matches!(
            SearchSpace::new().add_choice("x", vec![]).validate(),
            Err(SearchError::EmptyChoice { .. })
        ));
        assert!(matches!(
            SearchSpace::new()
                .add_int("x", 0, 1)
                .add_int("x", 0, 2)
                .validate(),
            Err(SearchError::DuplicateParameter { .. })
        ));
        assert!(sample_space().validate().is_ok());
    }

    #[test]
    fn materialize_merges_constants() {
        let space = sample_space();
        let mut rs = RandomSearch::with_seed(space.clone(), 1);
        let sampled = rs.suggest(1).remove(0);
        let full = space.materialize(&sampled).unwrap();

        assert_eq!(full.len(), 4);
        assert_eq!(full.get("eval_size"), Some(&ParameterValue::Int(200)));
        assert_eq!(full.get("cycles"), sampled.get("cycles"));
    }

    #[test]
    fn materialize_rejects_missing_and_out_of_domain() {
        let space = SearchSpace::new().add_int("x", 0, 3);
        assert!(matches!(
            space.materialize(&ParameterSet::new()),
            Err(SearchError::MissingParameter { .. })
        ));

        let mut sampled = ParameterSet::new();
        sampled.insert("x".into(), ParameterValue::Int(9));
        assert!(matches!(
            space.materialize(&sampled),
            Err(SearchError::OutOfDomain { .. })
        ));
    }

    #[test]
    fn parameter_values_serialize_untagged() {
        let mut params = ParameterSet::new();
        params.insert("a".into(), ParameterValue::Int(200));
        params.insert("b".into(), ParameterValue::Float(0.1));
        params.insert("c".into(), ParameterValue::Json(serde_json::json!(64)));
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"a":200,"b":0.1,"c":64}"#);
    }
}
