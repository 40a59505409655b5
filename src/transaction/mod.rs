pub mod model;

pub use model::{NewTransaction, Transaction};
