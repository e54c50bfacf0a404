pub mod criteria;
pub mod query;
pub mod registry;
pub mod resource;

pub use criteria::*;
pub use query::*;
pub use registry::*;
pub use resource::*;
