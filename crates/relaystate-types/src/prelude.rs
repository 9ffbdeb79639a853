pub use crate::error::{ClResult, Error};
pub use crate::snowflake::{EntityTag, Id};
pub use crate::store::{ConfigScope, ConfigStore, StatorEntity, StatorStore};
pub use crate::types::{Patch, StatorFields, Timestamp};
pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};
