pub mod expand;
pub mod parse;
pub mod response;
pub mod service;

pub use expand::*;
pub use parse::*;
pub use response::*;
pub use service::*;
