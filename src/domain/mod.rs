pub mod action;
pub mod market;
pub mod order;
pub mod position;

pub use action::*;
pub use market::*;
pub use order::*;
pub use position::*;
