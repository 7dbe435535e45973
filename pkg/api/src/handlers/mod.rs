pub mod certificates;
pub mod health;
