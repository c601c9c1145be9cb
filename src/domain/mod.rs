pub mod decision;
pub mod market;
pub mod order;
pub mod signal;

pub use decision::*;
pub use market::*;
pub use order::*;
pub use signal::*;
