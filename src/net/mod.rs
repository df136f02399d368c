pub mod character;
pub mod cipher;
pub mod codec;
pub mod login;
pub mod packet;
pub mod packets;
pub mod patch;
pub mod server;
pub mod session;
