pub mod site;

pub use site::{SiteAdapter, resolve_identifier};
