pub mod entities;
pub mod messaging;
pub mod repositories;
pub mod value_objects;

pub use entities::*;
pub use fleet_core::{FleetError, FleetResult};
pub use messaging::*;
pub use repositories::*;
pub use value_objects::*;
