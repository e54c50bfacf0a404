pub mod handlers;
pub mod request;
pub mod routes;

pub use handlers::*;
pub use request::*;
pub use routes::*;
