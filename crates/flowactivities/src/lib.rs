//! Standard activity library
//!
//! Collection of built-in activities for common operations

mod error;
mod log;
mod math;
mod time;
mod transform;

pub use error::ThrowActivity;
pub use log::LogActivity;
pub use math::{AddActivity, MultiplyActivity};
pub use time::DelayActivity;
pub use transform::{JsonParseActivity, JsonStringifyActivity};
use flowruntime::ActivityRegistry;

use std::sync::Arc;

/// Register all standard activities with a registry
pub fn register_all(registry: &mut ActivityRegistry) {
    registry.register(Arc::new(log::LogActivityFactory));
    registry.register(Arc::new(math::MultiplyActivityFactory));
    registry.register(Arc::new(math::AddActivityFactory));
    registry.register(Arc::new(transform::JsonParseActivityFactory));
    registry.register(Arc::new(transform::JsonStringifyActivityFactory));
    registry.register(Arc::new(time::DelayActivityFactory));
    registry.register(Arc::new(error::ThrowActivityFactory));
}
