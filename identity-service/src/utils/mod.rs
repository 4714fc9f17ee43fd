pub mod codec;
pub mod password;
pub mod pin;
