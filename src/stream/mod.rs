//! Stream combinators used by the delivery pipeline

mod pace;

pub use pace::{PaceExt, Paced};
