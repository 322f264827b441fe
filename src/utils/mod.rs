pub mod logging;
pub mod timing;

pub use logging::init_logging;
pub use timing::{jittered, jittered_ms, random_between};
