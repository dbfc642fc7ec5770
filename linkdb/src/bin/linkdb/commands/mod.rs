pub mod check;
pub mod link;
pub mod probe;
