use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedMessage {
    pub product_id: String,
    pub body: String,
    pub template_name: String,
}
