pub mod cell;
pub mod core;
pub mod grid;
pub mod save;
pub mod scope;
pub mod setup;
