pub mod directory;
pub mod models;

pub use directory::{PgProfileDirectory, ProfileDirectory, ProfileError};
pub use models::Brand;
