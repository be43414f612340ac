//! Usage: OAuth client subsystem (PKCE, token endpoint, loopback callback, session).

pub mod callback_server;
pub mod pkce;
pub mod session;
pub mod token_exchange;
