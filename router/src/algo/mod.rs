pub mod cost;
pub mod maze;
