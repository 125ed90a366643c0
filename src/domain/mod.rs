pub mod clock;
pub mod models;
pub mod orientation;
pub mod recovery;
pub mod settings;
