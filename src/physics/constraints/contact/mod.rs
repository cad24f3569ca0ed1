pub mod common;
pub mod convex;
pub mod nonconvex;
