//! # Role Capabilities
//!
//! Maps each staff role to the set of operations it may perform.
//!
//! ```text
//! ┌──────────────────────┬───────┬─────────┬─────────┬──────────┐
//! │ Capability           │ admin │ manager │ cashier │ salesman │
//! ├──────────────────────┼───────┼─────────┼─────────┼──────────┤
//! │ CreateInvoice        │   ✓   │    ✓    │    ✓    │    ✓     │
//! │ ViewProducts         │   ✓   │    ✓    │    ✓    │    ✓     │
//! │ ManageCustomers      │   ✓   │    ✓    │    ✓    │    ✓     │
//! │ ManageProducts       │   ✓   │    ✓    │         │          │
//! │ ManageCategories     │   ✓   │    ✓    │         │          │
//! │ AdjustStock          │   ✓   │    ✓    │         │          │
//! │ ViewStockHistory     │   ✓   │    ✓    │         │          │
//! │ ManageStaff          │   ✓   │    ✓    │         │          │
//! │ DeleteInvoice        │   ✓   │    ✓    │         │          │
//! │ ManageSettings       │   ✓   │         │         │          │
//! │ AdministerCounters   │   ✓   │         │         │          │
//! │ ViewReports          │   ✓   │         │         │          │
//! └──────────────────────┴───────┴─────────┴─────────┴──────────┘
//! ```
//!
//! Services call [`require`] at the top of every mutating operation instead
//! of each caller re-implementing role checks.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::types::UserRole;

/// An operation a role may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateInvoice,
    ViewProducts,
    ManageCustomers,
    ManageProducts,
    ManageCategories,
    AdjustStock,
    ViewStockHistory,
    ManageStaff,
    DeleteInvoice,
    ManageSettings,
    AdministerCounters,
    ViewReports,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Capability::CreateInvoice,
        Capability::ViewProducts,
        Capability::ManageCustomers,
        Capability::ManageProducts,
        Capability::ManageCategories,
        Capability::AdjustStock,
        Capability::ViewStockHistory,
        Capability::ManageStaff,
        Capability::DeleteInvoice,
        Capability::ManageSettings,
        Capability::AdministerCounters,
        Capability::ViewReports,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::CreateInvoice => "create invoices",
            Capability::ViewProducts => "view products",
            Capability::ManageCustomers => "manage customers",
            Capability::ManageProducts => "manage products",
            Capability::ManageCategories => "manage categories",
            Capability::AdjustStock => "adjust stock",
            Capability::ViewStockHistory => "view stock history",
            Capability::ManageStaff => "manage staff",
            Capability::DeleteInvoice => "delete invoices",
            Capability::ManageSettings => "manage settings",
            Capability::AdministerCounters => "administer invoice counters",
            Capability::ViewReports => "view reports",
        };
        f.write_str(s)
    }
}

/// Returns every capability granted to `role`.
pub fn allowed_operations(role: UserRole) -> HashSet<Capability> {
    use Capability::*;

    let counter_staff = [CreateInvoice, ViewProducts, ManageCustomers];
    let back_office = [
        ManageProducts,
        ManageCategories,
        AdjustStock,
        ViewStockHistory,
        ManageStaff,
        DeleteInvoice,
    ];

    match role {
        UserRole::Admin => Capability::ALL.into_iter().collect(),
        UserRole::Manager => counter_staff.into_iter().chain(back_office).collect(),
        UserRole::Cashier | UserRole::Salesman => counter_staff.into_iter().collect(),
    }
}

/// Whether `role` holds `capability`.
pub fn can(role: UserRole, capability: Capability) -> bool {
    allowed_operations(role).contains(&capability)
}

/// Fails with [`CoreError::PermissionDenied`] unless `role` holds `capability`.
pub fn require(role: UserRole, capability: Capability) -> CoreResult<()> {
    if can(role, capability) {
        Ok(())
    } else {
        Err(CoreError::PermissionDenied { role, capability })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_has_everything() {
        assert_eq!(allowed_operations(UserRole::Admin).len(), Capability::ALL.len());
    }

    #[test]
    fn test_every_role_can_sell() {
        for role in [
            UserRole::Admin,
            UserRole::Manager,
            UserRole::Cashier,
            UserRole::Salesman,
        ] {
            assert!(can(role, Capability::CreateInvoice), "{role} cannot sell");
        }
    }

    #[test]
    fn test_manager_cannot_reset_counters() {
        assert!(can(UserRole::Manager, Capability::AdjustStock));
        assert!(!can(UserRole::Manager, Capability::AdministerCounters));
    }

    #[test]
    fn test_require_reports_role_and_capability() {
        let err = require(UserRole::Cashier, Capability::AdjustStock).unwrap_err();
        assert_eq!(err.to_string(), "Role 'cashier' is not allowed to adjust stock");
    }
}
