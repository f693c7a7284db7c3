pub mod circuit_breaker;
pub mod database;
pub mod email;
pub mod fcm;
pub mod health;
pub mod rbmq;
pub mod redis;
pub mod sender;
pub mod status;
pub mod template;
pub mod user;
