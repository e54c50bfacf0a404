pub mod memory;
pub mod postgres;
pub mod traits;
pub mod validate;

pub use memory::*;
pub use postgres::*;
pub use traits::*;

use crate::model::{AssociationInclude, Record};

/// Keep only the selected fields of a row, plus any included associations.
pub(crate) fn project(row: &mut Record, selected: &[String], includes: &[AssociationInclude]) {
    row.retain(|key, _| selected.contains(key) || includes.iter().any(|i| &i.alias == key));
}
