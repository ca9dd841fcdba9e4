pub mod accounts;
pub mod agent;
pub mod destinations;
pub mod health;
pub mod nodes;
pub mod sessions;
pub mod tasks;
