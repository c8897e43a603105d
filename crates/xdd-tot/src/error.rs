// SPDX-License-Identifier: Apache-2.0

//! Errors for the Target Offset Table crate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The predecessor's recorded byte location did not match what the
    /// waiter expected (spec.md §4.5: "a waiter verifies the predecessor's
    /// slot to detect ordering bugs (assertion, not silent)").
    #[error("ToT ordering violation: op {op_number} expected predecessor op {predecessor_op} at byte {expected}, found {found}")]
    OrderingViolation {
        op_number: u64,
        predecessor_op: u64,
        expected: u64,
        found: u64,
    },
}
