pub mod handler;
pub mod persist;
pub mod room;
