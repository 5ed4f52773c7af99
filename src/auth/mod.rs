pub mod apikey;
pub mod gateway;
pub mod usage;

pub use gateway::{AuthGateway, KeyIdentity, Revocation};
pub use usage::UsageLogger;
