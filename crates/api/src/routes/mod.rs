pub mod orders;
pub mod payments;
pub mod products;
pub mod system;

use serde::Deserialize;

/// `?page=N` query of listing endpoints. Pages are 1-based.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }
}
