mod extractor;
mod probe;
mod resolver;

pub use extractor::*;
pub use probe::*;
pub use resolver::*;
