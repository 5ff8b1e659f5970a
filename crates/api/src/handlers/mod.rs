pub mod agent;
pub mod health;
pub mod release_tasks;
pub mod releases;
