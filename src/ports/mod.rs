pub mod catalog;
pub mod sink;
