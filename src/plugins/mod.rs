pub mod manager;
pub mod sites;
pub mod traits;

pub use manager::SiteRegistry;
pub use traits::SiteAdapter;
