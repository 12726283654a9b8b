//! Shared MIB profile registry
//!
//! One profile per device type, loaded at startup and shared read-only by
//! every device of that type. Ten thousand modems cost one tree's memory.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::oid::Oid;
use super::tree::{MibEntry, MibTree};
use super::value::SnmpValue;
use super::walk::{self, WalkStats};
use crate::{Error, Result};

/// Simulated device type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceType {
    CableModem,
    Cmts,
    Router,
    Switch,
    Custom(String),
}

impl DeviceType {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::CableModem => "cable_modem",
            DeviceType::Cmts => "cmts",
            DeviceType::Router => "router",
            DeviceType::Switch => "switch",
            DeviceType::Custom(name) => name,
        }
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "cable_modem" => DeviceType::CableModem,
            "cmts" => DeviceType::Cmts,
            "router" => DeviceType::Router,
            "switch" => DeviceType::Switch,
            "" => return Err(Error::parse("empty device type")),
            other => DeviceType::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for DeviceType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a profile's tree came from
#[derive(Debug, Clone)]
pub enum ProfileSource {
    WalkFile(PathBuf),
    Manual,
}

/// Immutable device profile: one shared MIB tree per device type
#[derive(Debug)]
pub struct Profile {
    pub device_type: DeviceType,
    pub tree: MibTree,
    pub source: ProfileSource,
}

/// A value in a programmatic device spec: either bare (type inferred) or
/// explicitly typed in walk-file notation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManualValue {
    Integer(i64),
    Text(String),
    Typed {
        #[serde(rename = "type")]
        value_type: String,
        value: String,
    },
}

impl ManualValue {
    pub fn decode(&self) -> Result<SnmpValue> {
        match self {
            ManualValue::Integer(n) => Ok(SnmpValue::Integer(*n)),
            ManualValue::Text(s) => Ok(SnmpValue::OctetString(s.as_bytes().to_vec())),
            ManualValue::Typed { value_type, value } => walk::parse_typed(value_type, value),
        }
    }
}

/// Process-wide registry of shared profiles
///
/// Writes happen at boot (profile loads); reads happen on every request.
/// Readers take the shared lock only long enough to clone an `Arc`.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: RwLock<HashMap<DeviceType, Arc<Profile>>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a recorded walk file as the profile for `device_type`.
    pub fn load_walk_file<P: AsRef<Path>>(
        &self,
        device_type: DeviceType,
        path: P,
    ) -> Result<WalkStats> {
        let path = path.as_ref();
        let (entries, stats) = walk::parse_walk_file(path)?;
        if entries.is_empty() {
            return Err(Error::profile(format!(
                "walk file {} produced no entries",
                path.display()
            )));
        }

        let tree = walk::build_tree(entries);
        info!(
            device_type = %device_type,
            oids = tree.len(),
            skipped = stats.skipped,
            file = %path.display(),
            "loaded device profile"
        );

        self.install(Profile {
            device_type,
            tree,
            source: ProfileSource::WalkFile(path.to_path_buf()),
        });
        Ok(stats)
    }

    /// Loads a programmatic device spec as the profile for `device_type`.
    pub fn load_manual(
        &self,
        device_type: DeviceType,
        spec: &HashMap<String, ManualValue>,
    ) -> Result<()> {
        let mut tree = MibTree::new();
        for (oid_str, manual) in spec {
            let oid = Oid::from_str(oid_str)?;
            tree.insert(oid, MibEntry::new(manual.decode()?));
        }
        if tree.is_empty() {
            return Err(Error::profile(format!(
                "manual profile for {} is empty",
                device_type
            )));
        }

        info!(device_type = %device_type, oids = tree.len(), "loaded manual profile");
        self.install(Profile {
            device_type,
            tree,
            source: ProfileSource::Manual,
        });
        Ok(())
    }

    pub fn install(&self, profile: Profile) {
        let mut profiles = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        profiles.insert(profile.device_type.clone(), Arc::new(profile));
    }

    pub fn get(&self, device_type: &DeviceType) -> Option<Arc<Profile>> {
        let profiles = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        profiles.get(device_type).cloned()
    }

    /// Exact lookup in the shared tree for `device_type`.
    pub fn get_oid_value(
        &self,
        device_type: &DeviceType,
        oid: &Oid,
    ) -> Result<Option<SnmpValue>> {
        let profile = self
            .get(device_type)
            .ok_or_else(|| Error::profile(format!("no profile loaded for {}", device_type)))?;
        Ok(profile.tree.get(oid).map(|entry| entry.value.clone()))
    }

    /// Lexicographic successor in the shared tree for `device_type`.
    pub fn get_next_oid(
        &self,
        device_type: &DeviceType,
        oid: &Oid,
    ) -> Result<Option<(Oid, SnmpValue)>> {
        let profile = self
            .get(device_type)
            .ok_or_else(|| Error::profile(format!("no profile loaded for {}", device_type)))?;
        Ok(profile.tree.get_next(oid))
    }

    pub fn get_all_oids(&self, device_type: &DeviceType) -> Result<Vec<Oid>> {
        let profile = self
            .get(device_type)
            .ok_or_else(|| Error::profile(format!("no profile loaded for {}", device_type)))?;
        Ok(profile.tree.sorted_oids())
    }

    pub fn loaded_types(&self) -> Vec<DeviceType> {
        let profiles = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        profiles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let profiles = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn registry_with_modem() -> ProfileRegistry {
        let registry = ProfileRegistry::new();
        let mut spec = HashMap::new();
        spec.insert(
            "1.3.6.1.2.1.1.1.0".to_string(),
            ManualValue::Text("Motorola SB6141".to_string()),
        );
        spec.insert("1.3.6.1.2.1.1.7.0".to_string(), ManualValue::Integer(72));
        registry
            .load_manual(DeviceType::CableModem, &spec)
            .unwrap();
        registry
    }

    #[test]
    fn test_device_type_round_trip() {
        for s in ["cable_modem", "cmts", "router", "switch", "dslam"] {
            let dt: DeviceType = s.parse().unwrap();
            assert_eq!(dt.to_string(), s);
        }
        assert_eq!(
            "dslam".parse::<DeviceType>().unwrap(),
            DeviceType::Custom("dslam".to_string())
        );
    }

    #[test]
    fn test_manual_profile_lookup() {
        let registry = registry_with_modem();

        let value = registry
            .get_oid_value(
                &DeviceType::CableModem,
                &"1.3.6.1.2.1.1.1.0".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(
            value,
            Some(SnmpValue::OctetString(b"Motorola SB6141".to_vec()))
        );

        let missing = registry
            .get_oid_value(
                &DeviceType::CableModem,
                &"1.3.6.1.9.9.9.0".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_unknown_device_type_is_error() {
        let registry = registry_with_modem();
        assert!(registry
            .get_oid_value(&DeviceType::Cmts, &"1.3.6.1".parse().unwrap())
            .is_err());
    }

    #[test]
    fn test_walk_file_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.3.6.1.2.1.1.1.0 = STRING: CMTS-9000").unwrap();
        writeln!(file, "1.3.6.1.2.1.1.3.0 = Timeticks: (100)").unwrap();
        writeln!(file, "garbage = nonsense: ?").unwrap();
        file.flush().unwrap();

        let registry = ProfileRegistry::new();
        let stats = registry
            .load_walk_file(DeviceType::Cmts, file.path())
            .unwrap();
        assert_eq!(stats.parsed, 2);
        assert_eq!(stats.skipped, 1);

        let oids = registry.get_all_oids(&DeviceType::Cmts).unwrap();
        assert_eq!(oids.len(), 2);
    }

    #[test]
    fn test_shared_tree_single_copy() {
        let registry = registry_with_modem();
        let a = registry.get(&DeviceType::CableModem).unwrap();
        let b = registry.get(&DeviceType::CableModem).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_typed_manual_value() {
        let manual = ManualValue::Typed {
            value_type: "Counter32".to_string(),
            value: "4242".to_string(),
        };
        assert_eq!(manual.decode().unwrap(), SnmpValue::Counter32(4242));
    }
}
