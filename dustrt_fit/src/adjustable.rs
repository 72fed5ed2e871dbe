//! A template simulation with adjustable attribute values.
//!
//! The template is an ordinary simulation file in which any attribute
//! value may be written as `[label: default]`. Performing the
//! simulation with a replacement dictionary substitutes the labelled
//! values; labels without a replacement fall back to their default.

use dustrt::config;
use dustrt::error::{Error, Result};
use dustrt::simulation::FilePaths;
use std::collections::HashMap;
use std::path::Path;

/// A simulation description with labelled adjustable values.
pub struct AdjustableSimulation {
    content: String,
    paths: FilePaths,
    threads: usize,
    labels: Vec<String>,
}

impl AdjustableSimulation {
    /// Reads the template file (appending the `.xml` extension when the
    /// file does not exist as specified) and scans its labels.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the file cannot be read and a
    /// configuration error when the bracket syntax is malformed.
    pub fn new(file: &Path, paths: FilePaths, threads: usize) -> Result<Self> {
        let file = config::resolve_simulation_file(file);
        let content = std::fs::read_to_string(&file).map_err(|err| Error::Resource {
            path: file.clone(),
            reason: err.to_string(),
        })?;
        let labels = scan_labels(&content)?;
        log::info!(
            "Template {} exposes {} adjustable value(s)",
            file.display(),
            labels.len()
        );
        Ok(Self {
            content,
            paths,
            threads,
            labels,
        })
    }

    /// Returns the labels of the adjustable values, in template order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the file paths the performed simulations derive from.
    #[must_use]
    pub const fn file_paths(&self) -> &FilePaths {
        &self.paths
    }

    /// Returns the simulation content with every bracketed segment
    /// replaced: by the replacement value when the label is in the
    /// dictionary, by the default otherwise.
    ///
    /// # Errors
    ///
    /// Fatal when the square brackets are not balanced or a segment
    /// lacks the colon separating label and default.
    pub fn adjusted_content(&self, replacements: &HashMap<String, f64>) -> Result<String> {
        let input = self.content.as_str();
        let mut output = String::with_capacity(input.len());
        let mut index = 0;

        while let Some(left) = input[index..].find('[') {
            let left = index + left;
            let right = input[left + 1..]
                .find(']')
                .map(|offset| left + 1 + offset)
                .ok_or_else(|| {
                    Error::fatal("Square brackets not balanced in simulation template")
                })?;

            output.push_str(&input[index..left]);
            index = right + 1;

            let segment = &input[left + 1..right];
            if segment.contains('[') {
                return Err(Error::fatal(
                    "Square brackets not balanced in simulation template",
                ));
            }
            let colon = segment.find(':').ok_or_else(|| {
                Error::fatal("Square brackets don't enclose colon in simulation template")
            })?;
            let label = &segment[..colon];
            match replacements.get(label) {
                Some(value) => output.push_str(&format!("{value:e}")),
                None => output.push_str(segment[colon + 1..].trim()),
            }
        }
        output.push_str(&input[index..]);
        if output.contains(']') {
            return Err(Error::fatal(
                "Square brackets not balanced in simulation template",
            ));
        }
        Ok(output)
    }

    /// Builds the simulation for the given replacements, with the
    /// output prefix extended by the given suffix. The returned
    /// simulation is in the created state.
    ///
    /// # Errors
    ///
    /// Fatal on template or configuration errors.
    pub fn build_with(
        &self,
        replacements: &HashMap<String, f64>,
        suffix: &str,
    ) -> Result<dustrt::simulation::Simulation> {
        let content = self.adjusted_content(replacements)?;
        let root = config::parse_document(&content)?;
        let mut paths = self.paths.clone();
        paths.set_prefix(format!("{}_{}", self.paths.prefix(), suffix));
        let mut simulation = config::build_simulation(&root, paths)?;
        if self.threads > 0 {
            simulation.set_thread_count(self.threads);
        }
        Ok(simulation)
    }

    /// Performs the simulation for the given replacements, writing its
    /// output files with the prefix extended by the given suffix.
    ///
    /// # Errors
    ///
    /// Returns the first setup or run failure.
    pub fn perform_with(
        &self,
        replacements: &HashMap<String, f64>,
        suffix: &str,
    ) -> Result<PerformedRun> {
        let mut simulation = self.build_with(replacements, suffix)?;
        simulation.setup_and_run()?;
        Ok(PerformedRun {
            prefix: simulation.file_paths().prefix().to_owned(),
            instrument_names: simulation.instrument_names(),
            nframes: simulation.wavelengths().nlambda(),
        })
    }
}

/// Bookkeeping for one performed simulation run.
pub struct PerformedRun {
    /// The output prefix the run wrote its files under.
    pub prefix: String,
    /// The instrument names, in configuration order.
    pub instrument_names: Vec<String>,
    /// The number of wavelength frames.
    pub nframes: usize,
}

fn scan_labels(content: &str) -> Result<Vec<String>> {
    let mut labels = Vec::new();
    let mut index = 0;
    while let Some(left) = content[index..].find('[') {
        let left = index + left;
        let right = content[left + 1..]
            .find(']')
            .map(|offset| left + 1 + offset)
            .ok_or_else(|| Error::fatal("Square brackets not balanced in simulation template"))?;
        let segment = &content[left + 1..right];
        let colon = segment.find(':').ok_or_else(|| {
            Error::fatal("Square brackets don't enclose colon in simulation template")
        })?;
        let label = segment[..colon].to_owned();
        if !labels.contains(&label) {
            labels.push(label);
        }
        index = right + 1;
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"<A incl="[inclination: 30 deg]" mass="[mass: 2e3]" other="5"/>"#;

    fn paths() -> FilePaths {
        FilePaths::new(
            std::env::temp_dir(),
            std::env::temp_dir(),
            "fit".to_owned(),
            std::env::temp_dir(),
        )
    }

    fn template_simulation(content: &str) -> AdjustableSimulation {
        let dir = std::env::temp_dir().join("dustrt_adjustable_test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join(format!("template_{:x}.xml", content.len()));
        std::fs::write(&file, content).unwrap();
        AdjustableSimulation::new(&file, paths(), 1).unwrap()
    }

    #[test]
    fn labels_are_discovered_in_order() {
        let template = template_simulation(TEMPLATE);
        assert_eq!(template.labels(), &["inclination".to_owned(), "mass".to_owned()]);
    }

    #[test]
    fn defaults_survive_without_replacements() {
        let template = template_simulation(TEMPLATE);
        let adjusted = template.adjusted_content(&HashMap::new()).unwrap();
        assert_eq!(adjusted, r#"<A incl="30 deg" mass="2e3" other="5"/>"#);
    }

    #[test]
    fn replacements_substitute_labelled_values() {
        let template = template_simulation(TEMPLATE);
        let mut replacements = HashMap::new();
        replacements.insert("mass".to_owned(), 4000.0);
        let adjusted = template.adjusted_content(&replacements).unwrap();
        assert!(adjusted.contains(r#"incl="30 deg""#));
        assert!(adjusted.contains("mass=\"4e3\""));
    }

    #[test]
    fn unbalanced_brackets_are_fatal() {
        let dir = std::env::temp_dir().join("dustrt_adjustable_test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("unbalanced.xml");
        std::fs::write(&file, r#"<A a="[x: 1"/>"#).unwrap();
        assert!(AdjustableSimulation::new(&file, paths(), 1).is_err());
    }

    #[test]
    fn missing_colon_is_fatal() {
        let dir = std::env::temp_dir().join("dustrt_adjustable_test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("colonless.xml");
        std::fs::write(&file, r#"<A a="[label 1]"/>"#).unwrap();
        assert!(AdjustableSimulation::new(&file, paths(), 1).is_err());
    }
}
