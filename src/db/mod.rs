pub mod store;

pub use store::{DescriptionRecord, DescriptionStore};
