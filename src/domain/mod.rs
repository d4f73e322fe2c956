pub mod market;
pub mod setup;
pub mod signal;

pub use market::*;
pub use setup::*;
pub use signal::*;
