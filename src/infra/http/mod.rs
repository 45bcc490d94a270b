mod middleware;
mod public;
pub mod reactive;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use public::{HttpState, build_router};
pub use reactive::reactive_layer;
