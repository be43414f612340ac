pub mod db;
pub mod settings;
