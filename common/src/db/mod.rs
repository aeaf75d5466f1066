pub mod core;
pub mod indices;
pub mod route;
pub mod tech;
