//! # Error Types
//!
//! Domain-specific error types for bazaar-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  bazaar-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  bazaar-db errors (separate crate)                                     │
//! │  └── DbError          - Storage failures + commit-time guards          │
//! │                                                                         │
//! │  bazaar-engine errors (separate crate)                                 │
//! │  └── EngineError      - What the register/terminal sees                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → Caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product name, amounts, order id)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message the cashier can act on

use thiserror::Error;

use crate::money::Money;
use crate::order::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations. They are recoverable:
/// the caller corrects the cart/payment/transition and retries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found or is inactive.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Service item cannot be found or is inactive.
    #[error("Service item not found: {0}")]
    ServiceItemNotFound(String),

    /// Order cannot be found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// FEFO-allocatable stock cannot cover the requested quantity.
    ///
    /// ## When This Occurs
    /// - A cart mutation would push demand past batch availability
    /// - Commit-time re-validation finds stock shrank since the cart was built
    ///
    /// Carries the product name and both quantities so the register can show
    /// exactly which line is short and by how much.
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// Cart line referenced by an update/remove does not exist.
    #[error("Cart line not found: {0}")]
    LineNotFound(String),

    /// Operation requires a non-empty cart or order.
    #[error("Cart is empty")]
    CartEmpty,

    /// Line quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Payment amount is invalid (zero, negative, or malformed).
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// Settled payments sum to less than the target total.
    #[error("Payments fall short of the total by {remaining}")]
    PaymentShortfall { remaining: Money },

    /// A split-tender addition would exceed the remaining balance.
    #[error("Payment of {attempted} exceeds remaining balance of {remaining}")]
    SplitOverpay { attempted: Money, remaining: Money },

    /// An order transition was attempted from a non-adjacent state.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// An operation was attempted on a billed or cancelled order.
    #[error("Order {order_id} is {status} and accepts no further changes")]
    OrderClosed {
        order_id: String,
        status: OrderStatus,
    },

    /// The billing policy refuses to bill an order in its current status.
    #[error("Order {order_id} is {status} and cannot be billed yet")]
    NotBillable {
        order_id: String,
        status: OrderStatus,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product: "Basmati Rice 5kg".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Basmati Rice 5kg: available 3, requested 5"
        );
    }

    #[test]
    fn test_payment_error_messages() {
        let err = CoreError::PaymentShortfall {
            remaining: Money::from_cents(2500),
        };
        assert_eq!(err.to_string(), "Payments fall short of the total by 25.00");

        let err = CoreError::SplitOverpay {
            attempted: Money::from_cents(6000),
            remaining: Money::from_cents(5000),
        };
        assert_eq!(
            err.to_string(),
            "Payment of 60.00 exceeds remaining balance of 50.00"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "name is required");

        let err = ValidationError::TooShort {
            field: "name".to_string(),
            min: 2,
        };
        assert_eq!(err.to_string(), "name must be at least 2 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "name".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
