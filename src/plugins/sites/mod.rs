pub mod kidsvillage;
pub mod open_graph;

pub use kidsvillage::KidsVillageAdapter;
pub use open_graph::OpenGraphAdapter;
