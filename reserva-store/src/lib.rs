pub mod app_config;
pub mod booking_repo;
pub mod catalog_repo;
pub mod database;
pub mod events;
pub mod memory;
pub mod redis_repo;

pub use app_config::Config;
pub use booking_repo::PgBookingStore;
pub use catalog_repo::{PgResourceCatalog, PgUserDirectory};
pub use database::DbClient;
pub use events::{EventProducer, KafkaAnalytics, KafkaNotifier};
pub use redis_repo::RedisClient;
