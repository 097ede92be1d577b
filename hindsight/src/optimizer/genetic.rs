use crate::error::EngineError;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Genetic search configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeneticConfig {
    pub population: usize,
    pub crossover_probability: f64,
    pub mutation_probability: f64,
    pub max_generations: u32,
    /// Stop after this many generations without elitist improvement, once
    /// at least half the space has been explored.
    pub stagnation_ages: u32,
    /// Seed for deterministic runs; `None` derives one from entropy.
    pub seed: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population: 50,
            crossover_probability: 0.8,
            mutation_probability: 0.1,
            max_generations: 100,
            stagnation_ages: 10,
            seed: None,
        }
    }
}

/// Best individual observed so far, preserved unchanged across
/// generations.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Elitist {
    pub chromosome: u64,
    pub score: f64,
    pub age: u32,
}

/// Fixed-size population of integer chromosomes, each interpreted as a
/// position index into the parameter space.
///
/// Selection is roulette-wheel on min-max normalised scores, crossover is
/// single-point on the chromosome bit length (retried until both children
/// land inside the space), mutation flips a single bit with retry.
#[derive(Debug)]
pub struct Population {
    config: GeneticConfig,
    space_size: u64,
    chromosome_length: u32,
    rng: StdRng,
    individuals: Vec<u64>,
    scores: Vec<f64>,
    selector: Vec<f64>,
    elitist: Option<Elitist>,
    age: u32,
    evaluations: u64,
}

/// Number of bits needed to count up to `space_size`.
fn chromosome_length(space_size: u64) -> u32 {
    let mut length = 0;
    let mut size = space_size;
    while size != 0 {
        length += 1;
        size /= 2;
    }
    length.max(1)
}

impl Population {
    pub fn new(config: GeneticConfig, space_size: u64) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let population = config.population.max(2);
        let individuals: Vec<u64> = (0..population)
            .map(|_| rng.random_range(0..space_size.max(1)))
            .collect();

        Self {
            chromosome_length: chromosome_length(space_size),
            space_size,
            rng,
            scores: vec![0.0; population],
            selector: vec![0.0; population],
            individuals,
            elitist: None,
            age: 0,
            evaluations: 0,
            config,
        }
    }

    pub fn elitist(&self) -> Option<Elitist> {
        self.elitist
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    /// Evolve until max generations or stagnation. `evaluate` maps a batch
    /// of chromosomes to their fitness scores.
    pub fn run(
        &mut self,
        evaluate: &mut impl FnMut(&[u64]) -> Result<Vec<f64>, EngineError>,
    ) -> Result<(), EngineError> {
        let mut best_score = f64::NEG_INFINITY;
        let mut stagnation = 0u32;

        for generation in 0..self.config.max_generations {
            self.age = generation;
            self.evolve(evaluate)?;

            let elitist_score = self.elitist.map(|elitist| elitist.score).unwrap_or(0.0);
            if generation == 0 {
                best_score = elitist_score;
            } else if (elitist_score - best_score).abs() < 1e-6 {
                stagnation += 1;
            } else {
                stagnation = 0;
                best_score = elitist_score;
            }

            debug!(
                generation,
                elitist_score,
                stagnation,
                "genetic generation finished"
            );

            if stagnation >= self.config.stagnation_ages
                && self.evaluations >= self.space_size / 2
            {
                break;
            }
        }

        Ok(())
    }

    fn evolve(
        &mut self,
        evaluate: &mut impl FnMut(&[u64]) -> Result<Vec<f64>, EngineError>,
    ) -> Result<(), EngineError> {
        self.evaluate(evaluate)?;
        self.reproduce_elitist();

        let size = self.individuals.len();
        let mut next = Vec::with_capacity(size);
        while next.len() < size {
            let first = self.select();
            let second = self.select();

            let mut chrom1 = self.individuals[first];
            let mut chrom2 = self.individuals[second];

            self.cross(&mut chrom1, &mut chrom2);
            self.mutate(&mut chrom1);
            self.mutate(&mut chrom2);

            next.push(chrom1);
            if next.len() < size {
                next.push(chrom2);
            }
        }

        self.individuals = next;
        Ok(())
    }

    fn evaluate(
        &mut self,
        evaluate: &mut impl FnMut(&[u64]) -> Result<Vec<f64>, EngineError>,
    ) -> Result<(), EngineError> {
        self.scores = evaluate(&self.individuals)?;
        self.evaluations += self.individuals.len() as u64;
        debug_assert_eq!(self.scores.len(), self.individuals.len());

        let score_min = self.scores.iter().copied().fold(f64::INFINITY, f64::min);
        let score_max = self.scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        // Min-max normalised fitness; a flat generation selects uniformly.
        let spread = score_max - score_min;
        let fitness: Vec<f64> = if spread.abs() < f64::EPSILON {
            vec![1.0; self.scores.len()]
        } else {
            self.scores
                .iter()
                .map(|score| (score - score_min) / spread)
                .collect()
        };

        let fitness_sum: f64 = fitness.iter().sum();
        let mut cumulative = 0.0;
        for (slot, fit) in self.selector.iter_mut().zip(&fitness) {
            cumulative += fit / fitness_sum;
            *slot = cumulative;
        }

        Ok(())
    }

    fn reproduce_elitist(&mut self) {
        for (chromosome, score) in self.individuals.iter().zip(&self.scores) {
            let better = self
                .elitist
                .map(|elitist| *score > elitist.score)
                .unwrap_or(true);
            if better {
                self.elitist = Some(Elitist {
                    chromosome: *chromosome,
                    score: *score,
                    age: self.age,
                });
            }
        }
    }

    fn select(&mut self) -> usize {
        let t: f64 = self.rng.random();
        self.selector
            .iter()
            .position(|cumulative| *cumulative > t)
            .unwrap_or(self.selector.len() - 1)
    }

    fn cross(&mut self, chrom1: &mut u64, chrom2: &mut u64) {
        if *chrom1 == *chrom2 || self.chromosome_length < 2 {
            return;
        }
        let p: f64 = self.rng.random();
        if p >= self.config.crossover_probability {
            return;
        }

        for _ in 0..64 {
            let split = self.rng.random_range(1..self.chromosome_length);
            let mask = u64::MAX << split;

            let first = (*chrom1 & mask) | (*chrom2 & !mask);
            let second = (*chrom2 & mask) | (*chrom1 & !mask);

            if first < self.space_size && second < self.space_size {
                *chrom1 = first;
                *chrom2 = second;
                return;
            }
        }
    }

    fn mutate(&mut self, chromosome: &mut u64) {
        let p: f64 = self.rng.random();
        if p >= self.config.mutation_probability {
            return;
        }

        for _ in 0..64 {
            let bit = self.rng.random_range(0..self.chromosome_length);
            let flipped = *chromosome ^ (1u64 << bit);
            if flipped < self.space_size {
                *chromosome = flipped;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> GeneticConfig {
        GeneticConfig {
            population: 20,
            max_generations: 40,
            seed: Some(seed),
            ..GeneticConfig::default()
        }
    }

    #[test]
    fn test_chromosome_length() {
        assert_eq!(chromosome_length(1), 1);
        assert_eq!(chromosome_length(2), 2);
        assert_eq!(chromosome_length(31), 5);
        assert_eq!(chromosome_length(32), 6);
    }

    #[test]
    fn test_finds_monotone_optimum() {
        let space = 32u64;
        let mut population = Population::new(config(7), space);

        // Deterministic monotone fitness: the best index is 31.
        population
            .run(&mut |chromosomes| {
                Ok(chromosomes.iter().map(|chrom| *chrom as f64).collect())
            })
            .unwrap();

        let elitist = population.elitist().unwrap();
        assert_eq!(elitist.chromosome, 31);
    }

    #[test]
    fn test_elitist_score_is_monotone() {
        let mut population = Population::new(config(11), 64);
        let mut best_seen = f64::NEG_INFINITY;

        for _ in 0..10 {
            population
                .evolve(&mut |chromosomes| {
                    Ok(chromosomes
                        .iter()
                        .map(|chrom| (*chrom % 17) as f64)
                        .collect())
                })
                .unwrap();

            let score = population.elitist().unwrap().score;
            assert!(score >= best_seen);
            best_seen = score;
        }
    }

    #[test]
    fn test_individuals_stay_in_space() {
        let space = 13u64;
        let mut population = Population::new(config(3), space);
        for _ in 0..20 {
            population
                .evolve(&mut |chromosomes| {
                    for chrom in chromosomes {
                        assert!(*chrom < space);
                    }
                    Ok(chromosomes.iter().map(|chrom| *chrom as f64).collect())
                })
                .unwrap();
        }
    }
}
