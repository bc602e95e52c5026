//! Response envelope shared by all endpoints.

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct SuccessBody<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T> SuccessBody<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
            pagination: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
}
