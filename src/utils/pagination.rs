use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{
    attendance::Attendance, audit_log::AuditLog, demo_request::DemoRequest, employee::Employee,
    leave_request::LeaveRequest, organization::Organization, shift::ShiftAssignment,
};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    /// 1-based page, `per_page` clamped to `1..=MAX_PER_PAGE`.
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

#[derive(Serialize, ToSchema)]
#[aliases(
    EmployeePage = Paginated<Employee>,
    LeavePage = Paginated<LeaveRequest>,
    AttendancePage = Paginated<Attendance>,
    AssignmentPage = Paginated<ShiftAssignment>,
    AuditLogPage = Paginated<AuditLog>,
    OrganizationPage = Paginated<Organization>,
    DemoRequestPage = Paginated<DemoRequest>
)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 57)]
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, page: Page, total: i64) -> Self {
        Self {
            data,
            page: page.page,
            per_page: page.per_page,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page() {
        let page = Page::new(None, None);
        assert_eq!(page, Page { page: 1, per_page: DEFAULT_PER_PAGE });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(Page::new(Some(0), Some(0)), Page { page: 1, per_page: 1 });
        assert_eq!(Page::new(Some(3), Some(1000)).per_page, MAX_PER_PAGE);
    }

    #[test]
    fn offset_skips_previous_pages() {
        assert_eq!(Page::new(Some(3), Some(10)).offset(), 20);
    }
}
