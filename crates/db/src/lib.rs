pub mod connection;
pub mod migrations;
pub mod readiness;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use readiness::{StoreReadiness, StoreState};
pub use repositories::{
    InMemoryTokenStore, SqlTokenStore, StoreError, StoreKey, TokenStore, BOT_TOKEN_KEY,
};
