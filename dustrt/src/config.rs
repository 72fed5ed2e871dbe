//! Simulation configuration: an XML document describing a tree of
//! simulation items.
//!
//! The element name is the item's registered name, attribute names are
//! scalar property names, and compound properties appear as nested
//! elements named after the property. Unknown attributes or elements are
//! fatal; missing required attributes without a default are fatal;
//! missing optional attributes with defaults use the default. Scalar
//! values are textual, with an optional unit suffix for physical
//! quantities.

use crate::dust::DustMix;
use crate::error::{Error, Result};
use crate::geometry::{
    Geometry, MgeGeometry, RotatedGeometry, SersicGeometry, ShellGeometry, SpheroidalGeometry,
    SphericalGeometry, TTauriDiskGeometry, TorusGeometry,
};
use crate::grid::{
    linear_mesh, power_mesh, symmetric_mesh, symmetric_power_mesh, zero_log_mesh,
    CylindricalGrid, DustGrid, SphericalGrid,
};
use crate::instrument::DistantInstrumentCore;
use crate::simulation::{
    DustSpec, FilePaths, FrameSpec, InstrumentSpec, SedSpec, Simulation, StellarComponentSpec,
};
use crate::units::{self, UnitSystem};
use crate::wavelength::WavelengthGrid;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::cell::RefCell;
use std::collections::HashSet;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

////////////////////////////////////////////////////////////////////
// generic XML tree

/// A parsed XML element: name, attributes in document order, and child
/// elements.
#[derive(Debug)]
pub struct XmlNode {
    /// The element name.
    pub name: String,
    /// Attribute name/value pairs.
    pub attributes: Vec<(String, String)>,
    /// Nested elements.
    pub children: Vec<XmlNode>,
}

/// Parses an XML document into its root element.
///
/// # Errors
///
/// Returns a configuration error when the document is not well formed or
/// contains non-whitespace text content.
pub fn parse_document(content: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    let make_node = |e: &quick_xml::events::BytesStart| -> Result<XmlNode> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in e.attributes() {
            let attribute =
                attribute.map_err(|err| Error::Config(format!("malformed attribute: {err}")))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|err| Error::Config(format!("malformed attribute value: {err}")))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(XmlNode {
            name,
            attributes,
            children: Vec::new(),
        })
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(make_node(&e)?),
            Ok(Event::Empty(e)) => {
                let node = make_node(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => {
                        return Err(Error::Config(
                            "multiple root elements in configuration file".to_owned(),
                        ))
                    }
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| {
                    Error::Config("unbalanced element in configuration file".to_owned())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => {
                        return Err(Error::Config(
                            "multiple root elements in configuration file".to_owned(),
                        ))
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|err| Error::Config(format!("malformed text: {err}")))?;
                if !text.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "unexpected text content '{}' in configuration file",
                        text.trim()
                    )));
                }
            }
            Ok(Event::Eof) => break,
            Ok(Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_)) => {}
            Ok(Event::CData(_)) => {
                return Err(Error::Config(
                    "unexpected CDATA in configuration file".to_owned(),
                ))
            }
            Err(err) => return Err(Error::Config(format!("malformed XML: {err}"))),
        }
    }

    root.ok_or_else(|| Error::Config("empty configuration file".to_owned()))
}

////////////////////////////////////////////////////////////////////
// property access with consumption tracking

/// Typed access to the properties of a simulation item node. Every
/// scalar property is an attribute and every compound property a nested
/// element; [`Properties::finish`] verifies that nothing was left
/// unclaimed, making unknown attributes and elements fatal.
pub struct Properties<'a> {
    node: &'a XmlNode,
    used_attributes: RefCell<HashSet<&'a str>>,
    used_children: RefCell<HashSet<&'a str>>,
}

impl<'a> Properties<'a> {
    /// Wraps an item node.
    #[must_use]
    pub fn new(node: &'a XmlNode) -> Self {
        Self {
            node,
            used_attributes: RefCell::new(HashSet::new()),
            used_children: RefCell::new(HashSet::new()),
        }
    }

    /// Returns the item name of the wrapped node.
    #[must_use]
    pub fn item_name(&self) -> &str {
        &self.node.name
    }

    fn raw(&self, name: &str) -> Option<&'a str> {
        let found = self
            .node
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(key, value)| (key.as_str(), value.as_str()));
        if let Some((key, value)) = found {
            self.used_attributes.borrow_mut().insert(key);
            return Some(value);
        }
        None
    }

    fn missing(&self, name: &str) -> Error {
        Error::Config(format!(
            "missing required attribute '{}' on {}",
            name, self.node.name
        ))
    }

    /// Returns a string property.
    ///
    /// # Errors
    ///
    /// Fatal when the attribute is required but absent.
    pub fn get_string(&self, name: &str, default: Option<&str>) -> Result<String> {
        match self.raw(name) {
            Some(value) => Ok(value.to_owned()),
            None => default
                .map(str::to_owned)
                .ok_or_else(|| self.missing(name)),
        }
    }

    /// Returns a boolean property (`true`/`false`).
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or not a boolean.
    pub fn get_bool(&self, name: &str, default: Option<bool>) -> Result<bool> {
        match self.raw(name) {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(Error::Config(format!(
                "invalid boolean value '{}' for attribute '{}' on {}",
                other, name, self.node.name
            ))),
            None => default.ok_or_else(|| self.missing(name)),
        }
    }

    /// Returns an integer property.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or not an integer.
    pub fn get_int(&self, name: &str, default: Option<i64>) -> Result<i64> {
        match self.raw(name) {
            Some(value) => value.parse().map_err(|_| {
                Error::Config(format!(
                    "invalid integer value '{}' for attribute '{}' on {}",
                    value, name, self.node.name
                ))
            }),
            None => default.ok_or_else(|| self.missing(name)),
        }
    }

    fn quantity(&self, name: &str, value: &str, convert: fn(&str) -> Option<f64>) -> Result<f64> {
        let mut parts = value.split_whitespace();
        let number: f64 = parts
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or_else(|| {
                Error::Config(format!(
                    "invalid numeric value '{}' for attribute '{}' on {}",
                    value, name, self.node.name
                ))
            })?;
        let factor = match parts.next() {
            None => 1.0,
            Some(unit) => convert(unit).ok_or_else(|| {
                Error::Config(format!(
                    "unknown unit '{}' for attribute '{}' on {}",
                    unit, name, self.node.name
                ))
            })?,
        };
        if parts.next().is_some() {
            return Err(Error::Config(format!(
                "trailing content in value '{}' for attribute '{}' on {}",
                value, name, self.node.name
            )));
        }
        Ok(number * factor)
    }

    fn get_quantity(
        &self,
        name: &str,
        default: Option<f64>,
        convert: fn(&str) -> Option<f64>,
    ) -> Result<f64> {
        match self.raw(name) {
            Some(value) => self.quantity(name, value, convert),
            None => default.ok_or_else(|| self.missing(name)),
        }
    }

    /// Returns a plain double property.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or malformed.
    pub fn get_double(&self, name: &str, default: Option<f64>) -> Result<f64> {
        self.get_quantity(name, default, |_| None)
    }

    /// Returns a length property, converted to meters.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or malformed.
    pub fn get_length(&self, name: &str, default: Option<f64>) -> Result<f64> {
        self.get_quantity(name, default, length_unit)
    }

    /// Returns an angle property, converted to radians.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or malformed.
    pub fn get_angle(&self, name: &str, default: Option<f64>) -> Result<f64> {
        self.get_quantity(name, default, angle_unit)
    }

    /// Returns a wavelength property, converted to meters.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or malformed.
    pub fn get_wavelength(&self, name: &str, default: Option<f64>) -> Result<f64> {
        self.get_quantity(name, default, wavelength_unit)
    }

    /// Returns a luminosity property, converted to watts.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or malformed.
    pub fn get_luminosity(&self, name: &str, default: Option<f64>) -> Result<f64> {
        self.get_quantity(name, default, luminosity_unit)
    }

    /// Returns a mass property, converted to kilograms.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or malformed.
    pub fn get_mass(&self, name: &str, default: Option<f64>) -> Result<f64> {
        self.get_quantity(name, default, mass_unit)
    }

    /// Returns a comma-separated list of wavelengths, converted to
    /// meters.
    ///
    /// # Errors
    ///
    /// Fatal when absent or malformed.
    pub fn get_wavelength_list(&self, name: &str) -> Result<Vec<f64>> {
        let raw = self.raw(name).ok_or_else(|| self.missing(name))?;
        raw.split(',')
            .map(|item| self.quantity(name, item.trim(), wavelength_unit))
            .collect()
    }

    /// Returns an enumeration property restricted to the allowed values.
    ///
    /// # Errors
    ///
    /// Fatal when absent without default or not among the allowed
    /// values.
    pub fn get_enum(
        &self,
        name: &str,
        allowed: &[&str],
        default: Option<&str>,
    ) -> Result<String> {
        let value = self.get_string(name, default)?;
        if allowed.contains(&value.as_str()) {
            Ok(value)
        } else {
            Err(Error::Config(format!(
                "invalid value '{}' for attribute '{}' on {}; allowed values: {}",
                value,
                name,
                self.node.name,
                allowed.join(", ")
            )))
        }
    }

    fn property_children(&self, name: &str) -> Vec<&'a XmlNode> {
        let mut found = Vec::new();
        for child in &self.node.children {
            if child.name == name {
                self.used_children.borrow_mut().insert(child.name.as_str());
                found.extend(child.children.iter());
            }
        }
        found
    }

    /// Returns the single item nested inside the compound property
    /// element with the given name.
    ///
    /// # Errors
    ///
    /// Fatal when the property is absent or holds more than one item.
    pub fn child_item(&self, name: &str) -> Result<&'a XmlNode> {
        let items = self.property_children(name);
        match items.len() {
            1 => Ok(items[0]),
            0 => Err(Error::Config(format!(
                "missing required element '{}' on {}",
                name, self.node.name
            ))),
            _ => Err(Error::Config(format!(
                "element '{}' on {} should hold exactly one item",
                name, self.node.name
            ))),
        }
    }

    /// Returns the single item nested inside the compound property, or
    /// `None` when the property is absent.
    ///
    /// # Errors
    ///
    /// Fatal when the property holds more than one item.
    pub fn optional_child_item(&self, name: &str) -> Result<Option<&'a XmlNode>> {
        if !self.node.children.iter().any(|child| child.name == name) {
            return Ok(None);
        }
        self.child_item(name).map(Some)
    }

    /// Returns the list of items nested inside the compound property
    /// element with the given name.
    ///
    /// # Errors
    ///
    /// Fatal when the property is absent or empty.
    pub fn child_items(&self, name: &str) -> Result<Vec<&'a XmlNode>> {
        let items = self.property_children(name);
        if items.is_empty() {
            return Err(Error::Config(format!(
                "missing required element '{}' on {}",
                name, self.node.name
            )));
        }
        Ok(items)
    }

    /// Verifies that every attribute and child element was claimed by a
    /// property accessor.
    ///
    /// # Errors
    ///
    /// Fatal on the first unknown attribute or element.
    pub fn finish(&self) -> Result<()> {
        for (key, _) in &self.node.attributes {
            if !self.used_attributes.borrow().contains(key.as_str()) {
                return Err(Error::Config(format!(
                    "unknown attribute '{}' on {}",
                    key, self.node.name
                )));
            }
        }
        for child in &self.node.children {
            if !self.used_children.borrow().contains(child.name.as_str()) {
                return Err(Error::Config(format!(
                    "unknown element '{}' on {}",
                    child.name, self.node.name
                )));
            }
        }
        Ok(())
    }
}

fn length_unit(unit: &str) -> Option<f64> {
    match unit {
        "m" => Some(1.0),
        "km" => Some(1e3),
        "AU" => Some(units::AU),
        "pc" => Some(units::PARSEC),
        "kpc" => Some(1e3 * units::PARSEC),
        "Mpc" => Some(1e6 * units::PARSEC),
        _ => None,
    }
}

fn angle_unit(unit: &str) -> Option<f64> {
    match unit {
        "rad" => Some(1.0),
        "deg" => Some(PI / 180.0),
        "arcsec" => Some(units::ARCSEC),
        _ => None,
    }
}

fn wavelength_unit(unit: &str) -> Option<f64> {
    match unit {
        "m" => Some(1.0),
        "micron" => Some(1e-6),
        "nm" => Some(1e-9),
        "Angstrom" => Some(1e-10),
        _ => None,
    }
}

fn luminosity_unit(unit: &str) -> Option<f64> {
    match unit {
        "W" => Some(1.0),
        "Lsun" => Some(units::LSUN),
        _ => None,
    }
}

fn mass_unit(unit: &str) -> Option<f64> {
    match unit {
        "kg" => Some(1.0),
        "Msun" => Some(1.988_47e30),
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////
// item builders

/// Builds a geometry from its item node. New geometry items plug in by
/// extending this registry.
///
/// # Errors
///
/// Fatal on an unknown item name or invalid property values.
pub fn build_geometry(node: &XmlNode, paths: &FilePaths) -> Result<Box<dyn Geometry>> {
    let properties = Properties::new(node);
    let geometry: Box<dyn Geometry> = match node.name.as_str() {
        "ShellGeometry" => Box::new(build_shell(&properties)?),
        "SersicGeometry" => Box::new(build_sersic(&properties)?),
        "TorusGeometry" => {
            let aniso = properties.get_bool("anisoRadius", Some(false))?;
            Box::new(TorusGeometry::new(
                properties.get_double("exponent", None)?,
                properties.get_double("index", None)?,
                properties.get_angle("openAngle", None)?,
                properties.get_length("minRadius", None)?,
                properties.get_length("maxRadius", None)?,
                aniso,
                properties.get_length("cutRadius", Some(0.0))?,
            )?)
        }
        "TTauriDiskGeometry" => Box::new(TTauriDiskGeometry::new(
            properties.get_length("minRadius", None)?,
            properties.get_length("maxRadius", None)?,
            properties.get_length("radialScale", None)?,
            properties.get_length("axialScale", None)?,
        )?),
        "MGEGeometry" => Box::new(MgeGeometry::from_file(
            &paths.input(&properties.get_string("filename", None)?),
            properties.get_length("pixelScale", None)?,
            properties.get_angle("inclination", None)?,
        )?),
        "SpheroidalGeometry" => {
            let inner = build_spherical_geometry(properties.child_item("geometry")?)?;
            Box::new(SpheroidalGeometry::new(
                inner,
                properties.get_double("flattening", None)?,
            )?)
        }
        "RotateGeometry" => {
            let inner = build_geometry(properties.child_item("geometry")?, paths)?;
            Box::new(RotatedGeometry::new(
                inner,
                properties.get_angle("alpha", None)?,
                properties.get_angle("beta", None)?,
                properties.get_angle("gamma", None)?,
            )?)
        }
        other => {
            return Err(Error::Config(format!("unknown geometry item '{other}'")));
        }
    };
    properties.finish()?;
    Ok(geometry)
}

fn build_shell(properties: &Properties) -> Result<ShellGeometry> {
    ShellGeometry::new(
        properties.get_length("minRadius", None)?,
        properties.get_length("maxRadius", None)?,
        properties.get_double("exponent", None)?,
    )
}

fn build_sersic(properties: &Properties) -> Result<SersicGeometry> {
    SersicGeometry::new(
        properties.get_double("index", None)?,
        properties.get_length("radius", None)?,
    )
}

fn build_spherical_geometry(node: &XmlNode) -> Result<Box<dyn SphericalGeometry>> {
    let properties = Properties::new(node);
    let geometry: Box<dyn SphericalGeometry> = match node.name.as_str() {
        "ShellGeometry" => Box::new(build_shell(&properties)?),
        "SersicGeometry" => Box::new(build_sersic(&properties)?),
        other => {
            return Err(Error::Config(format!(
                "'{other}' is not a spherical geometry item"
            )));
        }
    };
    properties.finish()?;
    Ok(geometry)
}

/// Builds a dust grid from its item node.
///
/// # Errors
///
/// Fatal on an unknown item name or invalid property values.
pub fn build_grid(node: &XmlNode) -> Result<Box<dyn DustGrid>> {
    let properties = Properties::new(node);
    let positive = |name: &str, value: i64| -> Result<usize> {
        if value <= 0 {
            return Err(Error::Config(format!(
                "the number of grid points '{name}' should be positive"
            )));
        }
        Ok(value as usize)
    };

    let grid: Box<dyn DustGrid> = match node.name.as_str() {
        "LinSphericalGrid" => {
            let nr = positive("radialPoints", properties.get_int("radialPoints", None)?)?;
            let ntheta = positive("angularPoints", properties.get_int("angularPoints", None)?)?;
            Box::new(SphericalGrid::new(
                linear_mesh(0.0, properties.get_length("extent", None)?, nr),
                linear_mesh(0.0, PI, ntheta),
            )?)
        }
        "PowSphericalGrid" => {
            let nr = positive("radialPoints", properties.get_int("radialPoints", None)?)?;
            let ntheta = positive("angularPoints", properties.get_int("angularPoints", None)?)?;
            Box::new(SphericalGrid::new(
                power_mesh(
                    properties.get_length("extent", None)?,
                    properties.get_double("ratio", None)?,
                    nr,
                ),
                linear_mesh(0.0, PI, ntheta),
            )?)
        }
        "LogSphericalGrid" => {
            let nr = positive("radialPoints", properties.get_int("radialPoints", None)?)?;
            let ntheta = positive("angularPoints", properties.get_int("angularPoints", None)?)?;
            Box::new(SphericalGrid::new(
                zero_log_mesh(
                    properties.get_length("innerExtent", None)?,
                    properties.get_length("outerExtent", None)?,
                    nr,
                ),
                linear_mesh(0.0, PI, ntheta),
            )?)
        }
        "LinCylindricalGrid" => {
            let nr = positive("radialPoints", properties.get_int("radialPoints", None)?)?;
            let nz = positive("axialPoints", properties.get_int("axialPoints", None)?)?;
            Box::new(CylindricalGrid::new(
                linear_mesh(0.0, properties.get_length("radialExtent", None)?, nr),
                symmetric_mesh(properties.get_length("axialExtent", None)?, nz),
            )?)
        }
        "PowCylindricalGrid" => {
            let nr = positive("radialPoints", properties.get_int("radialPoints", None)?)?;
            let nz = positive("axialPoints", properties.get_int("axialPoints", None)?)?;
            if nz % 2 != 0 {
                return Err(Error::Config(
                    "the number of axial grid points should be even".to_owned(),
                ));
            }
            Box::new(CylindricalGrid::new(
                power_mesh(
                    properties.get_length("radialExtent", None)?,
                    properties.get_double("radialRatio", None)?,
                    nr,
                ),
                symmetric_power_mesh(
                    properties.get_length("axialExtent", None)?,
                    properties.get_double("axialRatio", None)?,
                    nz,
                ),
            )?)
        }
        "LogCylindricalGrid" => {
            let nr = positive("radialPoints", properties.get_int("radialPoints", None)?)?;
            let nz = positive("axialPoints", properties.get_int("axialPoints", None)?)?;
            Box::new(CylindricalGrid::new(
                zero_log_mesh(
                    properties.get_length("radialInnerExtent", None)?,
                    properties.get_length("radialOuterExtent", None)?,
                    nr,
                ),
                symmetric_mesh(properties.get_length("axialExtent", None)?, nz),
            )?)
        }
        other => {
            return Err(Error::Config(format!("unknown dust grid item '{other}'")));
        }
    };
    properties.finish()?;
    Ok(grid)
}

fn build_mix(node: &XmlNode, grid: &WavelengthGrid, paths: &FilePaths) -> Result<DustMix> {
    let properties = Properties::new(node);
    let mix = match node.name.as_str() {
        "GreyDustMix" => DustMix::grey(
            grid.nlambda(),
            properties.get_double("opacity", None)?,
            properties.get_double("albedo", Some(0.5))?,
            properties.get_double("asymmetry", Some(0.0))?,
        )?,
        "FileDustMix" => {
            let path = paths.input(&properties.get_string("filename", None)?);
            read_file_mix(&path, grid)?
        }
        other => {
            return Err(Error::Config(format!("unknown dust mix item '{other}'")));
        }
    };
    properties.finish()?;
    Ok(mix)
}

// Reads a dust mix table: one "lambda kappa albedo asymmetry" line per
// wavelength, lambda in micron, interpolated onto the simulation grid.
fn read_file_mix(path: &Path, grid: &WavelengthGrid) -> Result<DustMix> {
    let content = std::fs::read_to_string(path).map_err(|err| Error::Resource {
        path: path.to_owned(),
        reason: err.to_string(),
    })?;
    let mut rows: Vec<[f64; 4]> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<f64> = trimmed
            .split_whitespace()
            .filter_map(|token| token.parse().ok())
            .collect();
        if fields.len() != 4 {
            return Err(Error::Resource {
                path: path.to_owned(),
                reason: format!("expected 4 fields per line, found {}", fields.len()),
            });
        }
        rows.push([fields[0] * 1e-6, fields[1], fields[2], fields[3]]);
    }
    if rows.is_empty() {
        return Err(Error::Resource {
            path: path.to_owned(),
            reason: "empty dust mix table".to_owned(),
        });
    }
    rows.sort_by(|a, b| a[0].partial_cmp(&b[0]).expect("finite wavelengths"));

    let interpolate = |lambda: f64, column: usize| -> f64 {
        if lambda <= rows[0][0] {
            return rows[0][column];
        }
        if lambda >= rows[rows.len() - 1][0] {
            return rows[rows.len() - 1][column];
        }
        let index = rows.partition_point(|row| row[0] < lambda);
        let (l0, l1) = (rows[index - 1][0], rows[index][0]);
        let (v0, v1) = (rows[index - 1][column], rows[index][column]);
        v0 + (lambda / l0).ln() / (l1 / l0).ln() * (v1 - v0)
    };

    DustMix::new(
        (0..grid.nlambda()).map(|ell| interpolate(grid.lambda(ell), 1)).collect(),
        (0..grid.nlambda()).map(|ell| interpolate(grid.lambda(ell), 2)).collect(),
        (0..grid.nlambda()).map(|ell| interpolate(grid.lambda(ell), 3)).collect(),
    )
}

fn build_wavelength_grid(node: &XmlNode, paths: &FilePaths) -> Result<WavelengthGrid> {
    let properties = Properties::new(node);
    let grid = match node.name.as_str() {
        "OligoWavelengthGrid" => {
            WavelengthGrid::new(properties.get_wavelength_list("wavelengths")?)?
        }
        "LogWavelengthGrid" => WavelengthGrid::logarithmic(
            properties.get_wavelength("minWavelength", None)?,
            properties.get_wavelength("maxWavelength", None)?,
            properties.get_int("points", None)?.max(0) as usize,
        )?,
        "FileWavelengthGrid" => {
            WavelengthGrid::from_file(&paths.input(&properties.get_string("filename", None)?))?
        }
        other => {
            return Err(Error::Config(format!(
                "unknown wavelength grid item '{other}'"
            )));
        }
    };
    properties.finish()?;
    Ok(grid)
}

fn build_sed_spec(node: &XmlNode) -> Result<SedSpec> {
    let properties = Properties::new(node);
    let spec = match node.name.as_str() {
        "FileSED" => SedSpec::File {
            filename: properties.get_string("filename", None)?,
        },
        "KuruczSED" => SedSpec::Kurucz {
            metallicity: properties.get_double("metallicity", Some(0.0))?,
            temperature: properties.get_double("temperature", None)?,
            gravity: properties.get_double("gravity", Some(4.5))?,
        },
        "FlatSED" => SedSpec::Flat,
        other => {
            return Err(Error::Config(format!("unknown SED item '{other}'")));
        }
    };
    properties.finish()?;
    Ok(spec)
}

fn build_instrument_spec(node: &XmlNode) -> Result<InstrumentSpec> {
    let properties = Properties::new(node);
    let core = DistantInstrumentCore::new(
        properties.get_string("instrumentName", None)?,
        properties.get_length("distance", None)?,
        properties.get_angle("inclination", Some(0.0))?,
        properties.get_angle("azimuth", Some(0.0))?,
        properties.get_angle("positionAngle", Some(0.0))?,
    )?;
    let spec = match node.name.as_str() {
        "SEDInstrument" => InstrumentSpec::Sed { core },
        "MultiFrameInstrument" => {
            let write_stellar_comps = properties.get_bool("writeStellarComps", Some(false))?;
            let mut frames = Vec::new();
            for frame_node in properties.child_items("frames")? {
                let frame = Properties::new(frame_node);
                if frame_node.name != "InstrumentFrame" {
                    return Err(Error::Config(format!(
                        "unknown instrument frame item '{}'",
                        frame_node.name
                    )));
                }
                frames.push(FrameSpec {
                    pixels_x: frame.get_int("pixelsX", None)?.max(0) as usize,
                    pixels_y: frame.get_int("pixelsY", None)?.max(0) as usize,
                    extent_x: frame.get_length("extentX", None)?,
                    extent_y: frame.get_length("extentY", None)?,
                });
                frame.finish()?;
            }
            InstrumentSpec::MultiFrame {
                core,
                frames,
                write_stellar_comps,
            }
        }
        other => {
            return Err(Error::Config(format!("unknown instrument item '{other}'")));
        }
    };
    properties.finish()?;
    Ok(spec)
}

/// Builds a simulation, in the created state, from the root element of a
/// configuration document.
///
/// # Errors
///
/// Fatal on any structural or value error in the document.
pub fn build_simulation(root: &XmlNode, paths: FilePaths) -> Result<Simulation> {
    if root.name != "MonteCarloSimulation" {
        return Err(Error::Config(format!(
            "the root element should be a MonteCarloSimulation, found '{}'",
            root.name
        )));
    }
    let properties = Properties::new(root);

    let packets = properties.get_int("packets", None)?;
    if packets <= 0 {
        return Err(Error::Config(
            "the number of photon packets should be positive".to_owned(),
        ));
    }
    let seed = properties.get_int("seed", Some(crate::random::DEFAULT_SEED as i64))?;
    let min_weight_reduction = properties.get_double("minWeightReduction", Some(1e4))?;
    if min_weight_reduction <= 1.0 {
        return Err(Error::Config(
            "the minimum weight reduction factor should be larger than one".to_owned(),
        ));
    }
    let threads = properties.get_int("threads", Some(0))?.max(0) as usize;

    let units_node = properties.child_item("units")?;
    let units_properties = Properties::new(units_node);
    units_properties.finish()?;
    let units = UnitSystem::from_name(&units_node.name).ok_or_else(|| {
        Error::Config(format!("unknown unit system item '{}'", units_node.name))
    })?;

    let wavelengths = build_wavelength_grid(properties.child_item("wavelengthGrid")?, &paths)?;

    // stellar system
    let stellar_node = properties.child_item("stellarSystem")?;
    let stellar_properties = Properties::new(stellar_node);
    if stellar_node.name != "StellarSystem" {
        return Err(Error::Config(format!(
            "unknown stellar system item '{}'",
            stellar_node.name
        )));
    }
    let mut components = Vec::new();
    for component_node in stellar_properties.child_items("components")? {
        if component_node.name != "StellarComponent" {
            return Err(Error::Config(format!(
                "unknown stellar component item '{}'",
                component_node.name
            )));
        }
        let component = Properties::new(component_node);
        components.push(StellarComponentSpec {
            luminosity: component.get_luminosity("luminosity", None)?,
            geometry: build_geometry(component.child_item("geometry")?, &paths)?,
            sed: build_sed_spec(component.child_item("sed")?)?,
        });
        component.finish()?;
    }
    stellar_properties.finish()?;

    // optional dust system
    let dust = match properties.optional_child_item("dustSystem")? {
        None => None,
        Some(dust_node) => {
            if dust_node.name != "DustSystem" {
                return Err(Error::Config(format!(
                    "unknown dust system item '{}'",
                    dust_node.name
                )));
            }
            let dust_properties = Properties::new(dust_node);
            let spec = DustSpec {
                mass: dust_properties.get_mass("mass", None)?,
                geometry: build_geometry(dust_properties.child_item("geometry")?, &paths)?,
                grid: build_grid(dust_properties.child_item("grid")?)?,
                mix: build_mix(dust_properties.child_item("mix")?, &wavelengths, &paths)?,
            };
            dust_properties.finish()?;
            Some(spec)
        }
    };

    // instrument system
    let instrument_node = properties.child_item("instrumentSystem")?;
    if instrument_node.name != "InstrumentSystem" {
        return Err(Error::Config(format!(
            "unknown instrument system item '{}'",
            instrument_node.name
        )));
    }
    let instrument_properties = Properties::new(instrument_node);
    let mut instruments = Vec::new();
    for node in instrument_properties.child_items("instruments")? {
        instruments.push(build_instrument_spec(node)?);
    }
    instrument_properties.finish()?;

    properties.finish()?;

    Ok(Simulation::from_parts(
        packets as usize,
        seed as u64,
        min_weight_reduction,
        threads,
        units,
        wavelengths,
        components,
        dust,
        instruments,
        paths,
    ))
}

/// Reads and builds a simulation from a configuration file.
///
/// # Errors
///
/// Fatal on read or parse failures and on any structural error.
pub fn load_simulation(file: &Path, paths: FilePaths) -> Result<Simulation> {
    let content = std::fs::read_to_string(file).map_err(|err| Error::Resource {
        path: file.to_owned(),
        reason: err.to_string(),
    })?;
    let root = parse_document(&content)?;
    build_simulation(&root, paths)
}

/// Returns the path of a simulation file: the name as given, or with the
/// `.xml` extension appended when the file does not exist as specified.
#[must_use]
pub fn resolve_simulation_file(path: &Path) -> PathBuf {
    if !path.exists() && path.extension().is_none() {
        return path.with_extension("xml");
    }
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        <MonteCarloSimulation packets="1000">
          <units><SIUnits/></units>
          <wavelengthGrid>
            <OligoWavelengthGrid wavelengths="0.55 micron"/>
          </wavelengthGrid>
          <stellarSystem>
            <StellarSystem>
              <components>
                <StellarComponent luminosity="1 Lsun">
                  <geometry>
                    <ShellGeometry minRadius="1 AU" maxRadius="2 AU" exponent="2"/>
                  </geometry>
                  <sed><FlatSED/></sed>
                </StellarComponent>
              </components>
            </StellarSystem>
          </stellarSystem>
          <instrumentSystem>
            <InstrumentSystem>
              <instruments>
                <SEDInstrument instrumentName="i0" distance="10 pc"/>
              </instruments>
            </InstrumentSystem>
          </instrumentSystem>
        </MonteCarloSimulation>"#;

    fn paths() -> FilePaths {
        FilePaths::new(
            std::env::temp_dir(),
            std::env::temp_dir(),
            "test".to_owned(),
            std::env::temp_dir(),
        )
    }

    #[test]
    fn minimal_document_builds() {
        let root = parse_document(MINIMAL).unwrap();
        assert_eq!(root.name, "MonteCarloSimulation");
        let simulation = build_simulation(&root, paths()).unwrap();
        assert_eq!(simulation.wavelengths().nlambda(), 1);
    }

    #[test]
    fn unknown_attribute_is_fatal() {
        let content = MINIMAL.replace("packets=\"1000\"", "packets=\"1000\" bogus=\"1\"");
        let root = parse_document(&content).unwrap();
        let err = build_simulation(&root, paths()).unwrap_err();
        assert!(err.to_string().contains("unknown attribute 'bogus'"));
    }

    #[test]
    fn missing_required_attribute_is_fatal() {
        let content = MINIMAL.replace(" packets=\"1000\"", "");
        let root = parse_document(&content).unwrap();
        let err = build_simulation(&root, paths()).unwrap_err();
        assert!(err.to_string().contains("packets"));
    }

    #[test]
    fn unknown_element_is_fatal() {
        let content = MINIMAL.replace("<sed><FlatSED/></sed>", "<sed><FlatSED/></sed><wat/>");
        let root = parse_document(&content).unwrap();
        let err = build_simulation(&root, paths()).unwrap_err();
        assert!(err.to_string().contains("unknown element 'wat'"));
    }

    #[test]
    fn units_with_suffixes_are_converted() {
        let node = XmlNode {
            name: "Test".to_owned(),
            attributes: vec![
                ("radius".to_owned(), "2 AU".to_owned()),
                ("angle".to_owned(), "90 deg".to_owned()),
                ("lambda".to_owned(), "0.55 micron".to_owned()),
            ],
            children: vec![],
        };
        let properties = Properties::new(&node);
        assert!((properties.get_length("radius", None).unwrap() - 2.0 * units::AU).abs() < 1e-3);
        assert!((properties.get_angle("angle", None).unwrap() - PI / 2.0).abs() < 1e-12);
        assert!((properties.get_wavelength("lambda", None).unwrap() - 5.5e-7).abs() < 1e-18);
        properties.finish().unwrap();
    }

    #[test]
    fn bad_unit_suffix_is_fatal() {
        let node = XmlNode {
            name: "Test".to_owned(),
            attributes: vec![("radius".to_owned(), "2 parsecs".to_owned())],
            children: vec![],
        };
        let properties = Properties::new(&node);
        assert!(properties.get_length("radius", None).is_err());
    }

    #[test]
    fn text_content_is_rejected() {
        assert!(parse_document("<A>text</A>").is_err());
    }

    #[test]
    fn multiframe_instrument_spec_parses_frames() {
        let content = MINIMAL.replace(
            r#"<SEDInstrument instrumentName="i0" distance="10 pc"/>"#,
            r#"<MultiFrameInstrument instrumentName="m" distance="10 pc" inclination="30 deg">
                 <frames>
                   <InstrumentFrame pixelsX="50" pixelsY="50" extentX="3 AU" extentY="3 AU"/>
                 </frames>
               </MultiFrameInstrument>"#,
        );
        let root = parse_document(&content).unwrap();
        // one frame for one wavelength passes setup later on
        assert!(build_simulation(&root, paths()).is_ok());
    }
}
