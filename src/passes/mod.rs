//! Pipeline passes, in execution order

pub mod pass_1;
pub mod pass_2;
pub mod pass_3;
pub mod pass_4;
pub mod pass_5;
pub mod pass_6;
