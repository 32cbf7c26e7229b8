pub mod admin;
pub mod barber;
pub mod public;
