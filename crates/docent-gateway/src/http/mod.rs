pub mod catalog;
pub mod converse;
pub mod health;
pub mod session;

use serde::Serialize;

/// Error body shared by every HTTP route.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
