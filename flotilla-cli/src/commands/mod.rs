pub mod cluster;
pub mod deployment;
pub mod feature;
pub mod group;
