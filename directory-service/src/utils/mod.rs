pub mod slug;
pub mod validation;

pub use slug::{random_suffix, slugify};
pub use validation::{validate_emails, ValidatedJson};
