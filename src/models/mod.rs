mod card;
mod machine_binding;
mod tenant;
mod use_log;

pub use card::*;
pub use machine_binding::*;
pub use tenant::*;
pub use use_log::*;
