//! Role based module gating.
//!
//! Access is a static lookup: every role maps to the set of modules it may
//! see and, for a subset of them, manage. Handlers call
//! [`AuthUser::require_view`](crate::auth::auth::AuthUser::require_view) or
//! `require_manage` before touching data.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Display, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    PlatformAdmin = 1,
    OrgAdmin = 2,
    Hr = 3,
    Manager = 4,
    Employee = 5,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::PlatformAdmin),
            2 => Some(Role::OrgAdmin),
            3 => Some(Role::Hr),
            4 => Some(Role::Manager),
            5 => Some(Role::Employee),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Display, AsRefStr, EnumIter, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Module {
    Dashboard,
    Organization,
    Employees,
    Departments,
    Attendance,
    LeaveRequests,
    Shifts,
    Billing,
    AuditLogs,
    Platform,
    Plans,
    DemoRequests,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    View,
    Manage,
}

static ACCESS_TABLE: Lazy<HashMap<Role, HashMap<Module, Access>>> = Lazy::new(|| {
    use Access::{Manage, View};
    use Module::*;

    let grants: [(Role, &[(Module, Access)]); 5] = [
        (
            Role::PlatformAdmin,
            &[
                (Dashboard, View),
                (AuditLogs, View),
                (Platform, Manage),
                (Plans, Manage),
                (DemoRequests, Manage),
            ],
        ),
        (
            Role::OrgAdmin,
            &[
                (Dashboard, View),
                (Organization, Manage),
                (Employees, Manage),
                (Departments, Manage),
                (Attendance, Manage),
                (LeaveRequests, Manage),
                (Shifts, Manage),
                (Billing, Manage),
                (AuditLogs, View),
            ],
        ),
        (
            Role::Hr,
            &[
                (Dashboard, View),
                (Organization, View),
                (Employees, Manage),
                (Departments, Manage),
                (Attendance, Manage),
                (LeaveRequests, Manage),
                (Shifts, Manage),
            ],
        ),
        (
            Role::Manager,
            &[
                (Dashboard, View),
                (Employees, View),
                (Departments, View),
                (Attendance, View),
                (LeaveRequests, Manage),
                (Shifts, Manage),
            ],
        ),
        (
            Role::Employee,
            &[
                (Dashboard, View),
                (Attendance, View),
                (LeaveRequests, View),
                (Shifts, View),
            ],
        ),
    ];

    grants
        .into_iter()
        .map(|(role, modules)| (role, modules.iter().copied().collect()))
        .collect()
});

pub fn access(role: Role, module: Module) -> Option<Access> {
    ACCESS_TABLE.get(&role).and_then(|m| m.get(&module)).copied()
}

pub fn can_view(role: Role, module: Module) -> bool {
    access(role, module).is_some()
}

pub fn can_manage(role: Role, module: Module) -> bool {
    access(role, module) == Some(Access::Manage)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleAccess {
    pub module: Module,
    pub access: Access,
}

/// Menu entries for a role in declaration order.
pub fn modules_for(role: Role) -> Vec<ModuleAccess> {
    Module::iter()
        .filter_map(|module| access(role, module).map(|access| ModuleAccess { module, access }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: [Role; 5] = [
        Role::PlatformAdmin,
        Role::OrgAdmin,
        Role::Hr,
        Role::Manager,
        Role::Employee,
    ];

    #[test]
    fn role_ids_round_trip() {
        for role in ROLES {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(6), None);
    }

    #[test]
    fn employees_cannot_manage_people() {
        assert!(!can_manage(Role::Employee, Module::Employees));
        assert!(!can_view(Role::Employee, Module::Employees));
        assert!(can_view(Role::Employee, Module::LeaveRequests));
        assert!(!can_manage(Role::Employee, Module::LeaveRequests));
    }

    #[test]
    fn platform_admin_sees_no_tenant_modules() {
        for module in [
            Module::Organization,
            Module::Employees,
            Module::Departments,
            Module::Attendance,
            Module::LeaveRequests,
            Module::Shifts,
            Module::Billing,
        ] {
            assert!(!can_view(Role::PlatformAdmin, module), "{module}");
        }
        assert!(can_manage(Role::PlatformAdmin, Module::Plans));
    }

    #[test]
    fn only_platform_admin_reaches_platform_modules() {
        for role in ROLES.into_iter().filter(|r| *r != Role::PlatformAdmin) {
            assert!(!can_view(role, Module::Platform));
            assert!(!can_view(role, Module::DemoRequests));
            assert!(!can_view(role, Module::Plans));
        }
    }

    #[test]
    fn billing_is_org_admin_only() {
        for role in ROLES {
            assert_eq!(can_manage(role, Module::Billing), role == Role::OrgAdmin);
        }
    }

    #[test]
    fn manage_implies_view() {
        for role in ROLES {
            for module in Module::iter() {
                if can_manage(role, module) {
                    assert!(can_view(role, module));
                }
            }
        }
    }

    #[test]
    fn every_role_has_a_dashboard() {
        for role in ROLES {
            let modules = modules_for(role);
            assert_eq!(modules.first().map(|m| m.module), Some(Module::Dashboard));
        }
    }

    #[test]
    fn menu_follows_declaration_order() {
        let modules: Vec<Module> = modules_for(Role::Manager).into_iter().map(|m| m.module).collect();
        assert_eq!(
            modules,
            vec![
                Module::Dashboard,
                Module::Employees,
                Module::Departments,
                Module::Attendance,
                Module::LeaveRequests,
                Module::Shifts,
            ]
        );
    }
}
