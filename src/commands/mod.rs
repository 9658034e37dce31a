pub mod install;
pub mod render;
