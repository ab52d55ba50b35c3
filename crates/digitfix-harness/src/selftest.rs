//! End-to-end self test: optionally install the patch, define the class,
//! run the battery against it and diagnose the combination.

use std::fmt;
use std::sync::Arc;

use digitfix_classfile::ClassReader;
use digitfix_error::Result;
use digitfix_patch::{PatchConfig, PatchState, PatchStateSnapshot, digest, premain};
use digitfix_vm::ExecMetrics;
use serde::Serialize;
use tracing::info;

use crate::battery::{BatteryReport, CaseGroup, run_battery, standard_battery};
use crate::boot::BootHost;
use crate::config::HarnessConfig;
use crate::diagnosis::{Diagnosis, result_code};
use crate::oracle::BytecodeOracle;
use crate::runtime::RuntimeProfile;

#[derive(Debug, Clone)]
pub struct SelfTest {
    config: HarnessConfig,
    agent: Option<PatchConfig>,
    state: Arc<PatchState>,
    battery: Vec<CaseGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub class_name: String,
    /// xxh3 of the bytes the rounding routine was run from.
    pub class_digest: String,
    pub runtime: RuntimeProfile,
    pub java8_or_newer: bool,
    pub battery: BatteryReport,
    pub patch: PatchStateSnapshot,
    pub code: u8,
    pub diagnosis: Diagnosis,
    pub result: String,
    pub metrics: ExecMetrics,
}

impl SelfTest {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            agent: None,
            state: Arc::new(PatchState::new()),
            battery: standard_battery(),
        }
    }

    /// Install the patch with `patch` before the class is defined.
    #[must_use]
    pub fn with_agent(mut self, patch: PatchConfig) -> Self {
        self.agent = Some(patch);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: Arc<PatchState>) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_battery(mut self, battery: Vec<CaseGroup>) -> Self {
        self.battery = battery;
        self
    }

    pub fn state(&self) -> &Arc<PatchState> {
        &self.state
    }

    pub fn run(&self, class_bytes: Vec<u8>) -> Result<SelfTestReport> {
        let mut host = BootHost::new();
        if let Some(patch) = &self.agent {
            premain(&mut host, patch.clone(), Arc::clone(&self.state))?;
        }
        let (class_name, implied) = {
            let reader = ClassReader::new(&class_bytes)?;
            (
                reader.name().to_owned(),
                RuntimeProfile::for_class_version(reader.header().major_version),
            )
        };
        let runtime = self.config.runtime(implied);
        let loaded = host.define_class(&class_name, class_bytes);
        let class_digest = digest(&loaded);

        let mut oracle = BytecodeOracle::new(loaded, self.config.vm)?;
        let battery = run_battery(
            &self.battery,
            &mut oracle,
            &runtime,
            self.config.print_actuals,
        );

        // Only now is the patch state final.
        let patch = self.state.snapshot();
        let java8_or_newer = runtime.is_java8_or_newer();
        let code = result_code(battery.passed, patch.applied, java8_or_newer);
        let diagnosis = Diagnosis::from_code(code, patch.installed);
        let result = diagnosis.message(&runtime);
        info!(
            class = %class_name,
            failed = battery.failed(),
            installed = patch.installed,
            applied = patch.applied,
            code,
            %result,
            "self test finished"
        );
        Ok(SelfTestReport {
            class_name,
            class_digest,
            runtime,
            java8_or_newer,
            battery,
            patch,
            code,
            diagnosis,
            result,
            metrics: oracle.vm().metrics(),
        })
    }
}

impl fmt::Display for SelfTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "PATCH SELF TEST:")?;
        writeln!(f, "  java.text.DigitList.shouldRoundUp(int,boolean,boolean)")?;
        writeln!(f, "  HALF_UP case")?;
        for group in &self.battery.groups {
            writeln!(f)?;
            writeln!(f, "{}", group.title)?;
            if let Some(note) = &group.note {
                writeln!(f, "{note}")?;
            }
            for case in &group.results {
                if let Some(exact) = &case.exact_value {
                    writeln!(f, "{:>15} is actually: {exact}", case.input)?;
                }
                let shown = if case.exact_value.is_some() {
                    ""
                } else {
                    case.input.as_str()
                };
                write!(f, "{shown:>15} {:<8} --> {:<15}\t", case.mode, case.actual)?;
                if case.passed {
                    writeln!(f, "OK")?;
                } else {
                    writeln!(f, "expected: {}", case.expected)?;
                }
            }
        }
        writeln!(f)?;
        writeln!(
            f,
            "Above tests used Java {} ({})",
            self.runtime.version, self.runtime.vendor
        )?;
        writeln!(f, "installed at {}", self.runtime.home)?;
        writeln!(f)?;
        writeln!(
            f,
            "Agent installed: {}",
            if self.patch.installed {
                "yes"
            } else {
                "NO (missing --agent?)"
            }
        )?;
        writeln!(
            f,
            "Patch applied  : {}",
            if self.patch.applied { "yes" } else { "NO" }
        )?;
        writeln!(f)?;
        writeln!(f, "Overall result : {}", self.result)
    }
}
