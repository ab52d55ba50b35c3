//! Behavioural verification of a loaded `DigitList` class.
//!
//! Formatting is reproduced natively but every rounding decision is taken
//! by the class's own `shouldRoundUp`, run in [`digitfix_vm`]. The battery
//! covers the published reports of the `HALF_UP` defect; the final
//! diagnosis combines its outcome with the patch state and the runtime
//! identity.

pub mod battery;
pub mod boot;
pub mod config;
pub mod diagnosis;
pub mod digit_list;
pub mod exact;
pub mod format;
pub mod oracle;
pub mod runtime;
pub mod selftest;

pub use battery::{
    BatteryReport, Case, CaseGroup, CaseResult, Expected, GroupReport, run_battery,
    standard_battery,
};
pub use boot::BootHost;
pub use config::HarnessConfig;
pub use diagnosis::{Diagnosis, result_code};
pub use digit_list::DigitList;
pub use format::NumberFormat;
pub use oracle::{BytecodeOracle, ReferenceOracle, RoundingOracle};
pub use runtime::RuntimeProfile;
pub use selftest::{SelfTest, SelfTestReport};
