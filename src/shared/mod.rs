pub mod blocking;
pub mod error;
pub mod security;
pub mod time;
