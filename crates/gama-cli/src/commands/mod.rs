pub mod islands;
pub mod simulate;
pub mod validate;
