pub mod http;
pub mod registry;

pub use http::{HttpOperationInvoker, PARAM_PREFIX};
pub use registry::OperationRegistry;
