pub mod interactions;
pub mod profiles;
