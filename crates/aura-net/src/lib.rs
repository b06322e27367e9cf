pub mod codec;
pub mod config;
pub mod conn;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod server;

pub use config::NetConfig;
pub use conn::{AuraConn, AuraTransport, ConnState};
pub use error::NetError;
pub use server::{AuraServer, ClientId, ConnHandle};
pub type NetResult<T> = Result<T, error::NetError>;
