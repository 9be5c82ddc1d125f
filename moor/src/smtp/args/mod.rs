mod address;
mod validator;

pub use address::*;
pub use validator::*;
