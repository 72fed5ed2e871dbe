use crate::GlobalConfiguration;
use anyhow::{anyhow, Context, Result};
use dustrt::simulation::FilePaths;
use globset::GlobBuilder;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expands a file pattern into the list of matching simulation files.
/// The directory part is taken literally; the file name part may carry
/// `*` and `?` wildcards. With `recursive` set, all directories nested
/// inside the base path are searched as well.
pub fn expand_pattern(pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let has_wildcards = pattern.contains('*') || pattern.contains('?');

    // a plain existing file needs no matching; without wildcards the
    // .xml extension is appended when the file does not exist as named
    if !has_wildcards && !recursive {
        let resolved = dustrt::config::resolve_simulation_file(path);
        if resolved.is_file() {
            return Ok(vec![resolved]);
        }
        return Err(anyhow!("no simulation file found for '{}'", pattern));
    }

    let base = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("'{}' has no file name part", pattern))?
        .to_string_lossy()
        .into_owned();
    let matcher = GlobBuilder::new(&name)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid pattern '{name}'"))?
        .compile_matcher();

    let walker = if recursive {
        WalkDir::new(&base)
    } else {
        WalkDir::new(&base).max_depth(1)
    };
    let mut files = Vec::new();
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if entry.file_type().is_file() && matcher.is_match(entry.file_name().to_string_lossy().as_ref()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(anyhow!("no simulation file found for '{}'", pattern));
    }
    Ok(files)
}

/// Assembles the file paths for one simulation file: input and output
/// directories from the options (relative to the file with `-k`), the
/// file stem as output prefix, and the resource root.
pub fn paths_for(
    file: &Path,
    cfg: &GlobalConfiguration,
    input: Option<&Path>,
    output: Option<&Path>,
    relative: bool,
) -> FilePaths {
    let anchor = if relative {
        file.parent().map_or_else(|| PathBuf::from("."), Path::to_owned)
    } else {
        PathBuf::from(".")
    };
    let resolve = |dir: Option<&Path>| match dir {
        Some(dir) if dir.is_absolute() => dir.to_owned(),
        Some(dir) => anchor.join(dir),
        None => anchor.clone(),
    };
    let resources = cfg.resources.clone().unwrap_or_else(|| {
        std::env::var_os("DUSTRT_RESOURCES").map_or_else(|| PathBuf::from("resources"), PathBuf::from)
    });
    let prefix = file
        .file_stem()
        .map_or_else(|| "simulation".to_owned(), |stem| stem.to_string_lossy().into_owned());
    FilePaths::new(resolve(input), resolve(output), prefix, resources)
}

/// Initializes the logger once, honoring the `-b` flag.
pub fn init_logging(brief: bool) {
    let level = if brief { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init()
        .ok();
}
