//! Genetic-algorithm search over a flat floating point genome.
//!
//! Every gene is constrained by an allele: an enumerated value set,
//! inclusive bounds, or a discretized range. Genomes are flat arrays of
//! doubles; the evaluation of a whole generation is delegated to a
//! caller-supplied batch function so that it can fan out over the task
//! farm.

use dustrt::error::{Error, Result};
use dustrt::random::Random;

/// The value constraint of a single gene.
#[derive(Clone, Debug)]
pub enum Allele {
    /// One of an explicit set of values.
    Enumerated {
        /// The allowed values.
        values: Vec<f64>,
    },
    /// Any value between inclusive bounds.
    Bounded {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// A bounded range restricted to multiples of a step.
    Discretized {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
        /// Step between adjacent values.
        step: f64,
    },
}

impl Allele {
    /// Validates the allele parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty value set, inverted
    /// bounds, or a non-positive step.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Enumerated { values } if values.is_empty() => Err(Error::Config(
                "an enumerated allele needs at least one value".to_owned(),
            )),
            Self::Enumerated { values } if values.len() == 1 => {
                // degenerate but legal; the search cannot vary this gene
                log::warn!("an enumerated allele with a single value cannot vary");
                Ok(())
            }
            Self::Bounded { min, max } | Self::Discretized { min, max, .. } if min >= max => {
                Err(Error::Config(
                    "the allele bounds should be ascending".to_owned(),
                ))
            }
            Self::Discretized { step, .. } if *step <= 0.0 => Err(Error::Config(
                "the allele step should be positive".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Draws a random value satisfying the constraint.
    pub fn random(&self, random: &mut Random) -> f64 {
        match self {
            Self::Enumerated { values } => {
                let index = (random.uniform() * values.len() as f64) as usize;
                values[index.min(values.len() - 1)]
            }
            Self::Bounded { min, max } => min + random.uniform() * (max - min),
            Self::Discretized { min, max, step } => {
                let steps = ((max - min) / step).floor();
                let index = (random.uniform() * (steps + 1.0)).floor().min(steps);
                min + index * step
            }
        }
    }

    /// Snaps an arbitrary value onto the constraint.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        match self {
            Self::Enumerated { values } => *values
                .iter()
                .min_by(|a, b| {
                    (*a - value)
                        .abs()
                        .partial_cmp(&(*b - value).abs())
                        .expect("finite allele values")
                })
                .expect("validated non-empty value set"),
            Self::Bounded { min, max } => value.clamp(*min, *max),
            Self::Discretized { min, max, step } => {
                let snapped = min + ((value - min) / step).round() * step;
                snapped.clamp(*min, *max)
            }
        }
    }

    /// Mutates a value: a fresh draw for enumerated alleles, a clamped
    /// gaussian step otherwise.
    pub fn mutate(&self, value: f64, random: &mut Random) -> f64 {
        match self {
            Self::Enumerated { .. } => self.random(random),
            Self::Bounded { min, max } | Self::Discretized { min, max, .. } => {
                let sigma = 0.1 * (max - min);
                self.clamp(value + sigma * random.gauss())
            }
        }
    }
}

/// A candidate solution: one value per allele.
pub type Genome = Vec<f64>;

/// Progress record of one generation.
#[derive(Clone, Debug)]
pub struct GenerationRecord {
    /// Index of the generation, starting at zero.
    pub generation: usize,
    /// Best (lowest) objective value found so far.
    pub best_score: f64,
    /// Mean objective value of the generation.
    pub mean_score: f64,
}

/// Configuration and state of the genetic-algorithm search. The
/// objective is minimized.
pub struct GeneticAlgorithm {
    alleles: Vec<Allele>,
    population_size: usize,
    generations: usize,
    crossover_probability: f64,
    mutation_probability: f64,
    elite_count: usize,
}

impl GeneticAlgorithm {
    /// Constructor; validates the alleles and the algorithm parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a parameter is out of range.
    pub fn new(
        alleles: Vec<Allele>,
        population_size: usize,
        generations: usize,
        crossover_probability: f64,
        mutation_probability: f64,
    ) -> Result<Self> {
        if alleles.is_empty() {
            return Err(Error::Config(
                "the search space needs at least one allele".to_owned(),
            ));
        }
        for allele in &alleles {
            allele.validate()?;
        }
        if population_size < 2 {
            return Err(Error::Config(
                "the population should hold at least two genomes".to_owned(),
            ));
        }
        if generations == 0 {
            return Err(Error::Config(
                "the number of generations should be positive".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&crossover_probability)
            || !(0.0..=1.0).contains(&mutation_probability)
        {
            return Err(Error::Config(
                "the crossover and mutation probabilities should be between 0 and 1".to_owned(),
            ));
        }
        Ok(Self {
            alleles,
            population_size,
            generations,
            crossover_probability,
            mutation_probability,
            elite_count: 1,
        })
    }

    /// Returns the number of genes per genome.
    #[must_use]
    pub fn genome_length(&self) -> usize {
        self.alleles.len()
    }

    fn random_genome(&self, random: &mut Random) -> Genome {
        self.alleles
            .iter()
            .map(|allele| allele.random(random))
            .collect()
    }

    fn tournament<'a>(
        &self,
        scored: &'a [(Genome, f64)],
        random: &mut Random,
    ) -> &'a Genome {
        let pick = |random: &mut Random| {
            let index = (random.uniform() * scored.len() as f64) as usize;
            index.min(scored.len() - 1)
        };
        let a = pick(random);
        let b = pick(random);
        if scored[a].1 <= scored[b].1 {
            &scored[a].0
        } else {
            &scored[b].0
        }
    }

    fn offspring(
        &self,
        scored: &[(Genome, f64)],
        random: &mut Random,
    ) -> Genome {
        let mother = self.tournament(scored, random);
        let father = self.tournament(scored, random);
        let mut child: Genome = if random.uniform() < self.crossover_probability {
            // uniform crossover: every gene picks a parent
            mother
                .iter()
                .zip(father)
                .map(|(m, f)| if random.uniform() < 0.5 { *m } else { *f })
                .collect()
        } else {
            mother.clone()
        };
        for (value, allele) in child.iter_mut().zip(&self.alleles) {
            if random.uniform() < self.mutation_probability {
                *value = allele.mutate(*value, random);
            }
        }
        child
    }

    /// Runs the search. The `evaluate` callback receives a whole
    /// generation and returns one objective value per genome, in input
    /// order.
    ///
    /// # Errors
    ///
    /// Propagates the first evaluation failure.
    pub fn run<F>(
        &self,
        random: &mut Random,
        mut evaluate: F,
    ) -> Result<(Genome, f64, Vec<GenerationRecord>)>
    where
        F: FnMut(&[Genome]) -> Result<Vec<f64>>,
    {
        let mut population: Vec<Genome> = (0..self.population_size)
            .map(|_| self.random_genome(random))
            .collect();
        let mut best: Option<(Genome, f64)> = None;
        let mut history = Vec::with_capacity(self.generations);

        for generation in 0..self.generations {
            let scores = evaluate(&population)?;
            if scores.len() != population.len() {
                return Err(Error::fatal(
                    "the evaluation returned a mismatched number of scores",
                ));
            }
            let mut scored: Vec<(Genome, f64)> =
                population.drain(..).zip(scores).collect();
            scored.sort_by(|a, b| a.1.partial_cmp(&b.1).expect("finite objective values"));

            if best
                .as_ref()
                .is_none_or(|(_, best_score)| scored[0].1 < *best_score)
            {
                best = Some((scored[0].0.clone(), scored[0].1));
            }
            let mean = scored.iter().map(|(_, score)| score).sum::<f64>()
                / scored.len() as f64;
            let record = GenerationRecord {
                generation,
                best_score: best.as_ref().expect("set above").1,
                mean_score: mean,
            };
            log::info!(
                "Generation {}: best score {:.6e}, mean score {:.6e}",
                generation,
                record.best_score,
                record.mean_score
            );
            history.push(record);

            // elites survive unchanged, the rest is bred
            population = scored
                .iter()
                .take(self.elite_count)
                .map(|(genome, _)| genome.clone())
                .collect();
            while population.len() < self.population_size {
                population.push(self.offspring(&scored, random));
            }
        }

        let (genome, score) = best.expect("at least one generation ran");
        Ok((genome, score, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn alleles_validate_their_parameters() {
        assert!(Allele::Enumerated { values: vec![] }.validate().is_err());
        assert!(Allele::Bounded { min: 2.0, max: 1.0 }.validate().is_err());
        assert!(Allele::Discretized {
            min: 0.0,
            max: 1.0,
            step: 0.0
        }
        .validate()
        .is_err());
        assert!(Allele::Bounded { min: 0.0, max: 1.0 }.validate().is_ok());
    }

    #[test]
    fn random_values_satisfy_constraints() {
        let mut random = Random::new(5, 0);
        let bounded = Allele::Bounded { min: -1.0, max: 3.0 };
        let discretized = Allele::Discretized {
            min: 0.0,
            max: 1.0,
            step: 0.25,
        };
        let enumerated = Allele::Enumerated {
            values: vec![1.0, 2.0, 7.0],
        };
        for _ in 0..1000 {
            let value = bounded.random(&mut random);
            assert!((-1.0..=3.0).contains(&value));
            let value = discretized.random(&mut random);
            assert!((value / 0.25 - (value / 0.25).round()).abs() < 1e-12);
            let value = enumerated.random(&mut random);
            assert!([1.0, 2.0, 7.0].contains(&value));
        }
    }

    #[test]
    fn clamp_snaps_to_the_constraint() {
        let discretized = Allele::Discretized {
            min: 0.0,
            max: 1.0,
            step: 0.25,
        };
        assert_approx_eq!(f64, discretized.clamp(0.61), 0.5, epsilon = 1e-12);
        assert_approx_eq!(f64, discretized.clamp(3.0), 1.0, epsilon = 1e-12);
        let enumerated = Allele::Enumerated {
            values: vec![1.0, 2.0, 7.0],
        };
        assert_approx_eq!(f64, enumerated.clamp(2.9), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn search_finds_a_quadratic_minimum() {
        let ga = GeneticAlgorithm::new(
            vec![
                Allele::Bounded { min: -5.0, max: 5.0 },
                Allele::Bounded { min: -5.0, max: 5.0 },
            ],
            30,
            40,
            0.65,
            0.2,
        )
        .unwrap();
        let mut random = Random::new(17, 0);
        let (genome, score, history) = ga
            .run(&mut random, |population| {
                Ok(population
                    .iter()
                    .map(|genome| {
                        (genome[0] - 1.0).powi(2) + (genome[1] + 2.0).powi(2)
                    })
                    .collect())
            })
            .unwrap();
        assert_eq!(history.len(), 40);
        assert!(score < 0.1, "score {score}");
        assert!((genome[0] - 1.0).abs() < 0.5);
        assert!((genome[1] + 2.0).abs() < 0.5);
        // the best score never degrades across generations
        assert!(history.windows(2).all(|w| w[1].best_score <= w[0].best_score));
    }

    #[test]
    fn evaluation_errors_propagate() {
        let ga = GeneticAlgorithm::new(
            vec![Allele::Bounded { min: 0.0, max: 1.0 }],
            4,
            3,
            0.5,
            0.1,
        )
        .unwrap();
        let mut random = Random::new(3, 0);
        let result = ga.run(&mut random, |_| Err(Error::fatal("evaluation failed")));
        assert!(result.is_err());
    }
}
