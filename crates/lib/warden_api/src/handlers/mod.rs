//! Request handlers.

pub mod auth;
pub mod invitations;
pub mod profile;
