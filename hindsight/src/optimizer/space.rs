use crate::strategy::{ParamItem, ParamKind, ParamValue, StrategyConfig};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// One parameter's `(start, end, step)` range resolved to a value count.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParamRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
    pub count: u64,
}

impl ParamRange {
    fn new(start: f64, end: f64, step: f64) -> Self {
        let count = if step == 0.0 {
            1
        } else {
            (((end - start) / step).abs() as u64) + 1
        };
        Self { start, end, step, count }
    }

    fn fixed() -> Self {
        Self { start: 0.0, end: 0.0, step: 0.0, count: 1 }
    }

    fn value_at(&self, index: u64) -> f64 {
        self.start + index as f64 * self.step
    }

    fn index_of(&self, value: f64) -> Option<u64> {
        if self.step == 0.0 {
            return Some(0);
        }
        let index = ((value - self.start) / self.step).round();
        if index < 0.0 {
            return None;
        }
        let index = index as u64;
        (index < self.count).then_some(index)
    }
}

#[derive(Debug, Clone)]
struct SpaceParam {
    name: SmolStr,
    kind: ParamKind,
    fixed_value: ParamValue,
    range: Option<ParamRange>,
}

/// The parameter sub-space one strategy contributes.
#[derive(Debug, Clone)]
pub struct StrategySpace {
    name: SmolStr,
    params: Vec<SpaceParam>,
    weights: Vec<u64>,
    size: u64,
}

impl StrategySpace {
    fn build(config: &StrategyConfig) -> Self {
        let params: Vec<SpaceParam> = config
            .params
            .iter()
            .map(|param| SpaceParam {
                name: param.name.clone(),
                kind: param.kind,
                fixed_value: param.value.clone(),
                range: param
                    .optimizing
                    .map(|opt| ParamRange::new(opt.start, opt.end, opt.step)),
            })
            .collect();

        let counts: Vec<u64> = params
            .iter()
            .map(|param| param.range.as_ref().map(|range| range.count).unwrap_or(1))
            .collect();
        let (weights, size) = mixed_radix_weights(&counts);

        Self {
            name: config.name.clone(),
            params,
            weights,
            size,
        }
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn decode(&self, mut position: u64) -> Vec<ParamItem> {
        debug_assert!(position < self.size.max(1));
        let mut tuple = Vec::with_capacity(self.params.len());

        for (param, weight) in self.params.iter().zip(&self.weights) {
            let index = position / weight;
            position %= weight;

            let value = match &param.range {
                None => param.fixed_value.clone(),
                Some(range) => {
                    let raw = range.value_at(index);
                    match param.kind {
                        ParamKind::Int => ParamValue::Int(raw.round() as i64),
                        ParamKind::Bool => ParamValue::Bool(raw != 0.0),
                        _ => ParamValue::Float(raw),
                    }
                }
            };

            tuple.push(ParamItem {
                name: param.name.clone(),
                kind: param.kind,
                value,
                optimizing: None,
            });
        }

        tuple
    }

    fn encode(&self, tuple: &[ParamItem]) -> Option<u64> {
        let mut position = 0;
        for ((param, weight), item) in self.params.iter().zip(&self.weights).zip(tuple) {
            let index = match &param.range {
                None => 0,
                Some(range) => range.index_of(item.value.as_f64()?)?,
            };
            position += index * weight;
        }
        Some(position)
    }
}

/// The Cartesian product of per-parameter ranges across all strategies in a
/// run.
///
/// Position-to-tuple decoding is mixed-radix counting over a precomputed
/// weight table: the first strategy (and within it the first parameter) is
/// most significant, the last varies fastest. The space is enumerated
/// lazily, never materialised.
#[derive(Debug, Clone)]
pub struct ParameterSpace {
    strategies: Vec<StrategySpace>,
    weights: Vec<u64>,
    total: u64,
}

impl ParameterSpace {
    pub fn build(configs: &[StrategyConfig]) -> Self {
        let strategies: Vec<StrategySpace> = configs.iter().map(StrategySpace::build).collect();
        let sizes: Vec<u64> = strategies.iter().map(|space| space.size).collect();
        let (weights, total) = mixed_radix_weights(&sizes);

        // A strategy with no parameters collapses the whole space.
        let total = if strategies.iter().any(|space| space.params.is_empty()) {
            0
        } else {
            total
        };

        Self {
            strategies,
            weights,
            total,
        }
    }

    /// Total number of parameter tuples.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn strategies(&self) -> &[StrategySpace] {
        &self.strategies
    }

    /// Concrete per-strategy parameter tuples at `position`.
    pub fn decode(&self, mut position: u64) -> Vec<Vec<ParamItem>> {
        debug_assert!(position < self.total.max(1));
        let mut tuples = Vec::with_capacity(self.strategies.len());

        for (space, weight) in self.strategies.iter().zip(&self.weights) {
            let index = position / weight;
            position %= weight;
            tuples.push(space.decode(index));
        }

        tuples
    }

    /// Inverse of [`ParameterSpace::decode`].
    pub fn encode(&self, tuples: &[Vec<ParamItem>]) -> Option<u64> {
        if tuples.len() != self.strategies.len() {
            return None;
        }

        let mut position = 0;
        for ((space, weight), tuple) in self.strategies.iter().zip(&self.weights).zip(tuples) {
            position += space.encode(tuple)? * weight;
        }
        Some(position)
    }

    /// Copies of `configs` with the parameter values at `position`
    /// substituted in.
    pub fn apply(&self, configs: &[StrategyConfig], position: u64) -> Vec<StrategyConfig> {
        let tuples = self.decode(position);
        configs
            .iter()
            .zip(tuples)
            .map(|(config, tuple)| {
                let mut config = config.clone();
                config.params = tuple;
                config
            })
            .collect()
    }
}

/// Weight table for mixed-radix counting: `weights[i] = Π counts[i+1..]`.
fn mixed_radix_weights(counts: &[u64]) -> (Vec<u64>, u64) {
    let mut weights = vec![1u64; counts.len()];
    let mut product = 1u64;
    for index in (0..counts.len()).rev() {
        weights[index] = product;
        product = product.saturating_mul(counts[index].max(1));
    }
    (weights, product)
}
