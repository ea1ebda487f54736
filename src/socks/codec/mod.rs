//! SOCKS5 wire codec
//!
//! Stateless readers and writers for every frame of the protocol subset the
//! bridge speaks. Each reader either consumes a complete frame or fails; a
//! stream that ends mid-frame always yields
//! [`BridgeError::UnexpectedEof`](crate::error::BridgeError::UnexpectedEof),
//! never a partial result.
//!
//! ```text
//! Greeting          VER | NMETHODS | METHODS...
//! Method selection  VER | METHOD
//! Auth request      0x01 | ULEN | UNAME | PLEN | PASSWD
//! Auth reply        0x01 | STATUS
//! Command request   VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT
//! Command reply     VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
//! ```

mod auth;
mod command;
mod greeting;
mod reply;

pub use auth::{
    read_auth_result, read_username_password_auth, write_auth_result,
    write_username_password_auth,
};
pub use command::{
    read_command_frame, read_command_request, resolve_request, write_command_request,
    HostResolver, SystemResolver,
};
pub use greeting::{read_greeting, read_method_selection, write_greeting, write_method_selection};
pub use reply::{read_command_reply, write_command_reply};
