// 基础设施层：数据库连接池

pub mod database;

pub use database::{mask_database_url, Database};
