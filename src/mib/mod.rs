//! MIB data model: OIDs, values, trees, walk files and shared profiles

pub mod oid;
pub mod profiles;
pub mod tree;
pub mod value;
pub mod walk;

pub use oid::Oid;
pub use profiles::{DeviceType, ManualValue, Profile, ProfileRegistry, ProfileSource};
pub use tree::{Behavior, MibEntry, MibTree};
pub use value::{SnmpValue, VarBind};
pub use walk::{WalkEntry, WalkStats};
