pub mod field;
pub mod uint;

pub use field::{Field, FieldElement, FieldError};
pub use uint::Uint256;
