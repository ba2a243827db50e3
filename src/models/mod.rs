pub mod location;
pub mod ride;
pub mod session;
pub mod user;
