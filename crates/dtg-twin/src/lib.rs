//! Twin-side value and model types shared by the dispatch core and its
//! collaborators: resource identity, timed values, the dynamic type lattice
//! and the `DigitalTwin` seam through which serialized commits are applied.

mod key;
mod twin;
mod value;
mod value_type;

pub use key::{DEFAULT_NAMESPACE_BASE, ResourceKey};
pub use twin::{DigitalTwin, MemoryTwin, ResourceDeclaration, TwinRecord};
pub use value::{TimedValue, now_wallclock_ns};
pub use value_type::ValueType;
