//! Fit scheme configuration files.
//!
//! A fit file is an XML document describing the template simulation,
//! the adjustable parameters with their allele constraints, the
//! reference frames, and the genetic-algorithm settings.

use crate::adjustable::AdjustableSimulation;
use crate::ga::{Allele, GeneticAlgorithm};
use crate::objective::Objective;
use crate::scheme::FitScheme;
use dustrt::comm::MessageLayer;
use dustrt::config::{parse_document, Properties, XmlNode};
use dustrt::error::{Error, Result};
use dustrt::farm::MasterSlaveManager;
use dustrt::random;
use dustrt::simulation::FilePaths;
use std::path::Path;
use std::sync::Arc;

fn get_parameter_value(properties: &Properties, name: &str, kind: &str) -> Result<f64> {
    match kind {
        "double" => properties.get_double(name, None),
        "length" => properties.get_length(name, None),
        "angle" => properties.get_angle(name, None),
        "wavelength" => properties.get_wavelength(name, None),
        "luminosity" => properties.get_luminosity(name, None),
        "mass" => properties.get_mass(name, None),
        other => Err(Error::Config(format!(
            "unknown parameter quantity kind '{other}'"
        ))),
    }
}

fn build_parameter(node: &XmlNode) -> Result<(String, Allele)> {
    let properties = Properties::new(node);
    let label = properties.get_string("label", None)?;
    let kind = properties.get_enum(
        "kind",
        &["double", "length", "angle", "wavelength", "luminosity", "mass"],
        Some("double"),
    )?;
    let allele = match node.name.as_str() {
        "BoundedParameter" => Allele::Bounded {
            min: get_parameter_value(&properties, "min", &kind)?,
            max: get_parameter_value(&properties, "max", &kind)?,
        },
        "DiscretizedParameter" => Allele::Discretized {
            min: get_parameter_value(&properties, "min", &kind)?,
            max: get_parameter_value(&properties, "max", &kind)?,
            step: get_parameter_value(&properties, "step", &kind)?,
        },
        "EnumeratedParameter" => {
            let raw = properties.get_string("values", None)?;
            let values = raw
                .split(',')
                .map(|item| {
                    item.trim().parse().map_err(|_| {
                        Error::Config(format!("invalid enumerated value '{}'", item.trim()))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            Allele::Enumerated { values }
        }
        other => {
            return Err(Error::Config(format!("unknown parameter item '{other}'")));
        }
    };
    allele.validate()?;
    properties.finish()?;
    Ok((label, allele))
}

/// Reads and builds a fit scheme from a fit file.
///
/// # Errors
///
/// Fatal on any structural or value error in the document, or when a
/// referenced file cannot be read.
pub fn load_fit_scheme(
    file: &Path,
    paths: FilePaths,
    parallel_simulations: usize,
    threads: usize,
    layer: Option<Arc<MessageLayer>>,
) -> Result<FitScheme> {
    let content = std::fs::read_to_string(file).map_err(|err| Error::Resource {
        path: file.to_owned(),
        reason: err.to_string(),
    })?;
    let root = parse_document(&content)?;
    if root.name != "FitScheme" {
        return Err(Error::Config(format!(
            "the root element should be a FitScheme, found '{}'",
            root.name
        )));
    }
    let properties = Properties::new(&root);

    let template = properties.get_string("template", None)?;
    let instrument = properties.get_string("instrument", Some(""))?;
    let population_size = properties.get_int("populationSize", Some(20))?.max(0) as usize;
    let generations = properties.get_int("generations", Some(10))?.max(0) as usize;
    let crossover = properties.get_double("crossoverProbability", Some(0.65))?;
    let mutation = properties.get_double("mutationProbability", Some(0.03))?;
    let seed = properties.get_int("seed", Some(random::DEFAULT_SEED as i64))? as u64;

    let mut labels = Vec::new();
    let mut alleles = Vec::new();
    for node in properties.child_items("parameters")? {
        let (label, allele) = build_parameter(node)?;
        if labels.contains(&label) {
            return Err(Error::Config(format!(
                "duplicate parameter label '{label}'"
            )));
        }
        labels.push(label);
        alleles.push(allele);
    }

    let mut references = Vec::new();
    for node in properties.child_items("references")? {
        if node.name != "ReferenceFrame" {
            return Err(Error::Config(format!(
                "unknown reference item '{}'",
                node.name
            )));
        }
        let reference = Properties::new(node);
        references.push(paths.input(&reference.get_string("filename", None)?));
        reference.finish()?;
    }
    properties.finish()?;

    let adjustable = AdjustableSimulation::new(&paths.input(&template), paths.clone(), threads)?;
    for label in &labels {
        if !adjustable.labels().contains(label) {
            return Err(Error::Config(format!(
                "parameter label '{label}' does not appear in the template"
            )));
        }
    }

    let objective = Objective::load(&references)?;
    let ga = GeneticAlgorithm::new(alleles, population_size, generations, crossover, mutation)?;
    let manager = MasterSlaveManager::with_layer(layer);

    Ok(FitScheme::new(
        adjustable,
        objective,
        ga,
        labels,
        instrument,
        manager,
        parallel_simulations,
        seed,
        paths,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_parse_their_kinds() {
        let root = parse_document(
            r#"<BoundedParameter label="incl" kind="angle" min="0 deg" max="90 deg"/>"#,
        )
        .unwrap();
        let (label, allele) = build_parameter(&root).unwrap();
        assert_eq!(label, "incl");
        let Allele::Bounded { min, max } = allele else {
            panic!("expected a bounded allele");
        };
        assert!(min.abs() < 1e-12);
        assert!((max - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn enumerated_values_parse_from_a_list() {
        let root = parse_document(
            r#"<EnumeratedParameter label="n" values="1.0, 2.5, 4.0"/>"#,
        )
        .unwrap();
        let (_, allele) = build_parameter(&root).unwrap();
        let Allele::Enumerated { values } = allele else {
            panic!("expected an enumerated allele");
        };
        assert_eq!(values, vec![1.0, 2.5, 4.0]);
    }

    #[test]
    fn unknown_parameter_kind_is_fatal() {
        let root = parse_document(
            r#"<BoundedParameter label="x" kind="furlongs" min="0" max="1"/>"#,
        )
        .unwrap();
        assert!(build_parameter(&root).is_err());
    }
}
