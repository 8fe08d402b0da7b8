pub mod health;
pub mod messages;
pub mod presence;

pub use health::*;
pub use messages::*;
pub use presence::*;
