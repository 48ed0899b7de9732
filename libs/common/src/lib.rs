pub mod id;
pub mod snowflake;

pub use id::PrefixedId;
pub use snowflake::SnowflakeGenerator;
