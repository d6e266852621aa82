pub mod enrichment;
pub mod incident;

pub use enrichment::*;
pub use incident::*;
