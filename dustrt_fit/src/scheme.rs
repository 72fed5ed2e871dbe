//! The fit scheme: orchestrates the genetic-algorithm search over the
//! master-slave task farm.

use crate::adjustable::AdjustableSimulation;
use crate::ga::{GenerationRecord, GeneticAlgorithm, Genome};
use crate::objective::Objective;
use dustrt::error::{Error, Result};
use dustrt::farm::{MasterSlaveManager, Task, Value};
use dustrt::random::Random;
use dustrt::simulation::FilePaths;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

/// Everything an evaluation task needs: the template, the references,
/// and the naming conventions of the runs.
struct EvaluationContext {
    adjustable: AdjustableSimulation,
    objective: Objective,
    labels: Vec<String>,
    instrument: String,
}

impl EvaluationContext {
    fn evaluate(&self, run_id: i64, genes: &[f64]) -> Result<f64> {
        if genes.len() != self.labels.len() {
            return Err(Error::fatal(
                "genome length does not match the parameter labels",
            ));
        }
        let replacements = self
            .labels
            .iter()
            .cloned()
            .zip(genes.iter().copied())
            .collect();
        let run = self.adjustable.perform_with(&replacements, &format!("{run_id}"))?;

        let instrument = if self.instrument.is_empty() {
            run.instrument_names.first().cloned().ok_or_else(|| {
                Error::Config("the template configures no instruments".to_owned())
            })?
        } else {
            self.instrument.clone()
        };
        self.objective.evaluate_run(
            self.adjustable.file_paths().output_path(),
            &run.prefix,
            &instrument,
            1,
        )
    }
}

struct EvaluationTask {
    context: Arc<EvaluationContext>,
}

impl Task for EvaluationTask {
    fn perform(&self, input: Value) -> Result<Value> {
        let Value::List(items) = input else {
            return Err(Error::Farm(
                "the evaluation task expects a (run id, genome) list".to_owned(),
            ));
        };
        let [id, genes] = items.as_slice() else {
            return Err(Error::Farm(
                "the evaluation task expects a (run id, genome) list".to_owned(),
            ));
        };
        let score = self.context.evaluate(id.to_int(), genes.as_doubles())?;
        Ok(Value::Double(score))
    }
}

/// A configured fit: repeatedly runs the adjustable simulation through
/// the task farm and searches the parameter space with the genetic
/// algorithm. The search itself runs on the master only; slaves loop in
/// the farm until released.
pub struct FitScheme {
    context: Arc<EvaluationContext>,
    ga: GeneticAlgorithm,
    manager: MasterSlaveManager,
    parallel_simulations: usize,
    seed: u64,
    paths: FilePaths,
}

impl FitScheme {
    /// Assembles a fit scheme from its parts.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        adjustable: AdjustableSimulation,
        objective: Objective,
        ga: GeneticAlgorithm,
        labels: Vec<String>,
        instrument: String,
        manager: MasterSlaveManager,
        parallel_simulations: usize,
        seed: u64,
        paths: FilePaths,
    ) -> Self {
        Self {
            context: Arc::new(EvaluationContext {
                adjustable,
                objective,
                labels,
                instrument,
            }),
            ga,
            manager,
            parallel_simulations,
            seed,
            paths,
        }
    }

    /// Returns the parameter labels of the search space.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.context.labels
    }

    /// Runs the fit: registers the evaluation task, acquires the
    /// slaves, performs the search on the master, and releases the
    /// slaves on every exit path.
    ///
    /// # Errors
    ///
    /// Propagates the first failure from the farm or the evaluations.
    pub fn run(&mut self) -> Result<(Genome, f64)> {
        self.manager.register_task(Box::new(EvaluationTask {
            context: Arc::clone(&self.context),
        }))?;
        self.manager
            .set_local_slave_count(self.parallel_simulations)?;
        self.manager.acquire_slaves()?;

        let result = if self.manager.is_master() {
            log::info!("Starting the fitting procedure...");
            self.run_master()
        } else {
            // a remote slave already served its obey loop inside
            // acquire_slaves and never searches itself
            Ok((Vec::new(), f64::INFINITY))
        };

        self.manager.release_slaves()?;
        result
    }

    fn run_master(&mut self) -> Result<(Genome, f64)> {
        let mut random = Random::new(self.seed, 0);
        let mut run_id: i64 = 0;

        let manager = &mut self.manager;
        let (genome, score, history) = self.ga.run(&mut random, |population| {
            let inputs: Vec<Value> = population
                .iter()
                .map(|genome| {
                    let input = Value::List(vec![
                        Value::Int(run_id),
                        Value::DoubleVec(genome.clone()),
                    ]);
                    run_id += 1;
                    input
                })
                .collect();
            let outputs = manager.perform_task(0, inputs)?;
            Ok(outputs.iter().map(Value::to_double).collect())
        })?;

        self.write_summary(&genome, score, &history)?;
        Ok((genome, score))
    }

    fn write_summary(
        &self,
        genome: &Genome,
        score: f64,
        history: &[GenerationRecord],
    ) -> Result<()> {
        let path = self
            .paths
            .output_path()
            .join(format!("{}_fit.dat", self.paths.prefix()));
        log::info!("Writing fit summary to {}...", path.display());
        let resource_err = |err: std::io::Error| Error::Resource {
            path: path.clone(),
            reason: err.to_string(),
        };

        let mut file = BufWriter::new(File::create(&path).map_err(resource_err)?);
        writeln!(file, "# best chi-squared: {score:.7e}").map_err(resource_err)?;
        for (label, value) in self.context.labels.iter().zip(genome) {
            writeln!(file, "{label}\t{value:.7e}").map_err(resource_err)?;
        }
        writeln!(file, "# generation\tbest\tmean").map_err(resource_err)?;
        for record in history {
            writeln!(
                file,
                "{}\t{:.7e}\t{:.7e}",
                record.generation, record.best_score, record.mean_score
            )
            .map_err(resource_err)?;
        }
        Ok(())
    }
}
