pub mod audit;
pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod onboarding;
pub mod routes;
pub mod scheduling;
pub mod settlement;
pub mod state;
pub mod storage;
