//! Object identifier type

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Object Identifier (OID)
///
/// A non-empty sequence of 32-bit components. Ordering is component-wise
/// lexicographic with a shorter prefix sorting before its extensions, which
/// is the comparison rule SNMP walks rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid {
    components: Vec<u32>,
}

impl Oid {
    pub fn new(components: Vec<u32>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::parse("OID must have at least one component"));
        }
        Ok(Self { components })
    }

    pub fn from_slice(components: &[u32]) -> Result<Self> {
        Self::new(components.to_vec())
    }

    pub fn components(&self) -> &[u32] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns a new OID with `component` appended.
    pub fn child(&self, component: u32) -> Self {
        let mut components = self.components.clone();
        components.push(component);
        Self { components }
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.components.len() >= prefix.components.len()
            && self.components[..prefix.components.len()] == prefix.components[..]
    }

    pub fn is_child_of(&self, parent: &Oid) -> bool {
        self.components.len() > parent.components.len() && self.starts_with(parent)
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let components: std::result::Result<Vec<u32>, _> = s
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u32>())
            .collect();

        match components {
            Ok(comps) => Self::new(comps),
            Err(_) => Err(Error::parse(format!("Invalid OID: {}", s))),
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.components {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", c)?;
            first = false;
        }
        Ok(())
    }
}
