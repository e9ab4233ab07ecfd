//! Backend implementations of [`crate::DataAdapter`].

pub mod sheets;
pub mod table_api;

pub use sheets::SheetsAdapter;
pub use table_api::TableApiAdapter;
