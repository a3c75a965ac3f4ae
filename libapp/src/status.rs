//! Named status values of an application.
//!
//! The `status` section of an interface file declares one typed field per
//! entry, `name=TYPE`. A server keeps the current values and answers
//! `STATUS_GET` and `STATUS_SET` messages from them.

use std::str::FromStr;

use libapp_parser::Config;

use crate::error::*;
use crate::variant::{Variant, VariantType};

pub const STATUS_SECTION: &str = "status";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppStatus {
    fields: Vec<(String, Variant)>,
}

impl AppStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut status = AppStatus::new();
        if let Some(section) = config.section(STATUS_SECTION) {
            for (name, token) in section.iter() {
                let vtype = VariantType::from_str(token.trim()).map_err(|e| {
                    Error::with_source(
                        ErrorKind::SchemaLoadError(format!("status field '{}': {}", name, e)),
                        e,
                    )
                })?;
                if matches!(vtype, VariantType::Void | VariantType::Pointer) {
                    return Err(ErrorKind::SchemaLoadError(format!(
                        "status field '{}' can not be {}",
                        name, vtype
                    ))
                    .into());
                }
                status.declare(name, vtype);
            }
        }
        Ok(status)
    }

    /// Add a field holding the zero value of `vtype`, or reset an existing
    /// one.
    pub fn declare<S: Into<String>>(&mut self, name: S, vtype: VariantType) {
        let name = name.into();
        let value = Variant::default_for(vtype);
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(field) => field.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Variant> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| ErrorKind::UnknownStatus(name.to_string()).into())
    }

    /// Store `value`, converted to the declared type. Returns the stored
    /// value.
    pub fn set(&mut self, name: &str, value: Variant) -> Result<&Variant> {
        let field = self
            .fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| Error::from(ErrorKind::UnknownStatus(name.to_string())))?;
        field.1 = value.get_as(field.1.variant_type())?;
        Ok(&field.1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        let config = Config::from_string("[status]\nload=DOUBLE\nstate=STRING\n").unwrap();
        let mut status = AppStatus::from_config(&config).unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status.get("load").unwrap(), &Variant::Double(0.0));

        assert_eq!(
            status.set("load", Variant::Float(0.5)).unwrap(),
            &Variant::Double(0.5)
        );
        assert_eq!(status.get("load").unwrap(), &Variant::Double(0.5));

        let e = status.set("state", Variant::Int32(1)).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::IncompatibleType { .. }));
        let e = status.get("missing").unwrap_err();
        assert_eq!(*e.kind(), ErrorKind::UnknownStatus("missing".into()));

        let names: Vec<_> = status.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["load", "state"]);
    }

    #[test]
    fn test_bad_status() {
        let config = Config::from_string("[status]\nx=VOID\n").unwrap();
        assert!(AppStatus::from_config(&config).is_err());
        let config = Config::from_string("[status]\nx=NUMBER\n").unwrap();
        assert!(AppStatus::from_config(&config).is_err());
        assert!(AppStatus::from_config(&Config::new()).unwrap().is_empty());
    }
}
