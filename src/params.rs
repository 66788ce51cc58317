//! Typed parameter table.
//!
//! Parameters are bulk-loaded once from a tab-separated fixture and keep
//! their insertion order for the whole session: a parameter's ordinal
//! index is its position in that order and is what index-based protocol
//! lookups resolve against. After load only values change; the set of
//! names and the total count are fixed.

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed on-the-wire width of a parameter name field.
pub const PARAM_ID_LEN: usize = 16;

pub type ParamName = ArrayString<PARAM_ID_LEN>;

/// Fixture bundled with the crate, mirroring a small autopilot table.
pub const DEFAULT_PARAM_FIXTURE: &str = include_str!("../fixtures/default.params");

const FIXTURE_FIELD_COUNT: usize = 5;

/// Declared parameter type, carried on the wire as a numeric tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ParamType {
    Int8 = 2,
    Uint32 = 5,
    Int32 = 6,
    Real32 = 9,
}

impl ParamType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            2 => Some(Self::Int8),
            5 => Some(Self::Uint32),
            6 => Some(Self::Int32),
            9 => Some(Self::Real32),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Real32(f32),
    Uint32(u32),
    Int32(i32),
    Int8(i8),
}

impl ParamValue {
    pub fn declared_type(self) -> ParamType {
        match self {
            Self::Real32(_) => ParamType::Real32,
            Self::Uint32(_) => ParamType::Uint32,
            Self::Int32(_) => ParamType::Int32,
            Self::Int8(_) => ParamType::Int8,
        }
    }

    /// Coerce to the protocol's single float value representation.
    pub fn as_f32(self) -> f32 {
        match self {
            Self::Real32(v) => v,
            Self::Uint32(v) => v as f32,
            Self::Int32(v) => v as f32,
            Self::Int8(v) => f32::from(v),
        }
    }

    /// Rebuild a value of declared type `ty` from the wire float.
    pub fn from_wire(raw: f32, ty: ParamType) -> Self {
        match ty {
            ParamType::Real32 => Self::Real32(raw),
            ParamType::Uint32 => Self::Uint32(raw as u32),
            ParamType::Int32 => Self::Int32(raw as i32),
            ParamType::Int8 => Self::Int8(raw as i8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: ParamName,
    pub value: ParamValue,
}

/// A malformed fixture record. Load-time failures are fatal: the endpoint
/// must not start with a partially loaded table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FixtureError {
    #[error("fixture line {line}: expected 5 tab-separated fields, found {found}")]
    FieldCount { line: usize, found: usize },
    #[error("fixture line {line}: unknown parameter type tag {tag:?}")]
    UnknownType { line: usize, tag: String },
    #[error("fixture line {line}: value {value:?} does not parse as type tag {tag}")]
    BadValue { line: usize, value: String, tag: u8 },
    #[error("fixture line {line}: parameter name {name:?} exceeds 16 bytes")]
    NameTooLong { line: usize, name: String },
}

/// Insertion-ordered name → parameter table.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    params: Vec<Parameter>,
}

impl ParamStore {
    /// Bulk-load from a fixture: one record per line, five tab-separated
    /// fields (two address-ish columns the core ignores, name, textual
    /// value, numeric type tag). `#` lines are comments. A record that is
    /// the wrong shape is a fatal load error.
    pub fn from_fixture(text: &str) -> Result<Self, FixtureError> {
        let mut store = Self::default();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != FIXTURE_FIELD_COUNT {
                return Err(FixtureError::FieldCount {
                    line: line_no,
                    found: fields.len(),
                });
            }

            let name_str = fields[2];
            let value_str = fields[3];
            let tag_str = fields[4].trim();

            let tag: u8 = tag_str.parse().map_err(|_| FixtureError::UnknownType {
                line: line_no,
                tag: tag_str.to_string(),
            })?;
            let ty = ParamType::from_tag(tag).ok_or_else(|| FixtureError::UnknownType {
                line: line_no,
                tag: tag_str.to_string(),
            })?;

            let value = match ty {
                ParamType::Real32 => value_str.trim().parse().ok().map(ParamValue::Real32),
                ParamType::Uint32 => value_str.trim().parse().ok().map(ParamValue::Uint32),
                ParamType::Int32 => value_str.trim().parse().ok().map(ParamValue::Int32),
                ParamType::Int8 => value_str.trim().parse().ok().map(ParamValue::Int8),
            }
            .ok_or_else(|| FixtureError::BadValue {
                line: line_no,
                value: value_str.to_string(),
                tag,
            })?;

            let name = ParamName::from(name_str).map_err(|_| FixtureError::NameTooLong {
                line: line_no,
                name: name_str.to_string(),
            })?;

            // A repeated name updates in place, keeping the first position.
            match store.params.iter_mut().find(|p| p.name == name) {
                Some(existing) => existing.value = value,
                None => store.params.push(Parameter { name, value }),
            }
        }

        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total count in the protocol's u16 representation.
    pub fn count(&self) -> u16 {
        self.params.len() as u16
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name.as_str() == name)
    }

    pub fn by_index(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    /// Resolve a name to its parameter and current ordinal index.
    pub fn get_indexed(&self, name: &str) -> Option<(usize, &Parameter)> {
        let index = self.index_of(name)?;
        Some((index, &self.params[index]))
    }

    /// Store the wire float into an existing parameter, preserving its
    /// declared type. Returns the new value and ordinal index, or `None`
    /// when the name is unknown.
    pub fn set_from_wire(&mut self, name: &str, raw: f32) -> Option<(usize, ParamValue)> {
        let index = self.index_of(name)?;
        let param = &mut self.params[index];
        param.value = ParamValue::from_wire(raw, param.value.declared_type());
        Some((index, param.value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "# comment line\n\
        1\t1\tSYS_AUTOSTART\t4010\t6\n\
        1\t1\tBAT_V_SCALING\t0.0082\t9\n\
        1\t1\tRC_MAP_THROTTLE\t3\t5\n\
        1\t1\tCOM_RC_IN_MODE\t0\t2\n";

    #[test]
    fn loads_records_in_fixture_order() {
        let store = ParamStore::from_fixture(FIXTURE).unwrap();

        assert_eq!(store.len(), 4);
        assert_eq!(store.index_of("SYS_AUTOSTART"), Some(0));
        assert_eq!(store.index_of("BAT_V_SCALING"), Some(1));
        assert_eq!(store.index_of("RC_MAP_THROTTLE"), Some(2));
        assert_eq!(store.index_of("COM_RC_IN_MODE"), Some(3));
    }

    #[test]
    fn values_parse_per_type_tag() {
        let store = ParamStore::from_fixture(FIXTURE).unwrap();

        assert_eq!(
            store.get_indexed("SYS_AUTOSTART").unwrap().1.value,
            ParamValue::Int32(4010)
        );
        assert_eq!(
            store.get_indexed("BAT_V_SCALING").unwrap().1.value,
            ParamValue::Real32(0.0082)
        );
        assert_eq!(
            store.get_indexed("RC_MAP_THROTTLE").unwrap().1.value,
            ParamValue::Uint32(3)
        );
        assert_eq!(
            store.get_indexed("COM_RC_IN_MODE").unwrap().1.value,
            ParamValue::Int8(0)
        );
    }

    #[test]
    fn wrong_field_count_is_fatal() {
        let err = ParamStore::from_fixture("1\t1\tNAME_ONLY\n").unwrap_err();
        assert_eq!(err, FixtureError::FieldCount { line: 1, found: 3 });
    }

    #[test]
    fn unknown_type_tag_is_fatal() {
        let err = ParamStore::from_fixture("1\t1\tBAD_TYPE\t1\t42\n").unwrap_err();
        assert!(matches!(err, FixtureError::UnknownType { line: 1, .. }));
    }

    #[test]
    fn unparseable_value_is_fatal() {
        let err = ParamStore::from_fixture("1\t1\tBAD_VALUE\tabc\t6\n").unwrap_err();
        assert!(matches!(err, FixtureError::BadValue { line: 1, tag: 6, .. }));
    }

    #[test]
    fn set_preserves_declared_type() {
        let mut store = ParamStore::from_fixture(FIXTURE).unwrap();

        let (index, value) = store.set_from_wire("SYS_AUTOSTART", 4001.0).unwrap();
        assert_eq!(index, 0);
        assert_eq!(value, ParamValue::Int32(4001));
        assert_eq!(value.declared_type(), ParamType::Int32);
    }

    #[test]
    fn default_fixture_loads() {
        let store = ParamStore::from_fixture(DEFAULT_PARAM_FIXTURE).unwrap();
        assert!(!store.is_empty());
    }
}
