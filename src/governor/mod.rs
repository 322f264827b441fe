//! Rate limits on interactive actions and on daily runtime.

mod cooldown;
mod runtime;

pub use cooldown::CooldownGovernor;
pub use runtime::RuntimeWindowGovernor;
