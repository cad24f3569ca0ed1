pub mod bodies;
pub mod body_description;
pub mod body_properties;
pub mod body_set;
pub mod bounding_box_updater;
pub mod broad_phase;
pub mod collidable;
pub mod constraint_batch;
pub mod constraint_location;
pub mod constraint_set;
pub mod constraints;
pub mod contact_manifold;
pub mod handles;
pub mod island_awakener;
pub mod island_sleeper;
pub mod manifold_reduction;
pub mod narrow_phase;
pub mod pair_cache;
pub mod pose_integration;
pub mod pose_integrator;
pub mod shapes;
pub mod simulation;
pub mod solver;
pub mod statics;
pub mod tree;
