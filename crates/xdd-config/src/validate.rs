// SPDX-License-Identifier: Apache-2.0

//! Config-time validation (spec.md §7 "Config: invalid parameters ...
//! Raised at construction; caller aborts before any thread spawns").

use xdd_types::config::{E2ERole, TargetConfig};

use crate::error::Error;
use crate::model::RunConfig;

pub fn validate_run(run: &RunConfig) -> Result<(), Error> {
    if run.targets.is_empty() {
        return Err(Error::RunValidation("a run needs at least one target".into()));
    }
    let mut seen = std::collections::HashSet::new();
    for target in &run.targets {
        if !seen.insert(target.name.clone()) {
            return Err(Error::RunValidation(format!("duplicate target name {:?}", target.name)));
        }
        validate_target(target)?;
    }
    Ok(())
}

fn validate_target(target: &TargetConfig) -> Result<(), Error> {
    let name = || target.name.clone();

    if target.block_size == 0 {
        return Err(Error::Validation { target: name(), message: "block_size must be nonzero".into() });
    }
    if target.reqsize == 0 {
        return Err(Error::Validation { target: name(), message: "reqsize must be nonzero".into() });
    }
    if target.queue_depth == 0 {
        return Err(Error::Validation { target: name(), message: "queue_depth must be at least 1".into() });
    }
    if !(0.0..=1.0).contains(&target.rwratio) {
        return Err(Error::Validation { target: name(), message: format!("rwratio {} is outside [0, 1]", target.rwratio) });
    }

    // Exactly one of numreqs/total_bytes fixes target_ops (spec.md §3
    // "Target": "numreqs *or* total bytes (exactly one fixes target_ops)").
    match (target.numreqs, target.total_bytes) {
        (Some(_), Some(_)) => {
            return Err(Error::Validation { target: name(), message: "exactly one of numreqs/total_bytes may be set, not both".into() })
        }
        (None, None) => return Err(Error::Validation { target: name(), message: "one of numreqs/total_bytes must be set".into() }),
        _ => {}
    }

    if let Some(e2e) = &target.e2e {
        if e2e.peers.is_empty() {
            return Err(Error::Validation { target: name(), message: "an E2E target needs at least one peer address".into() });
        }
        // The source side only ever issues reads off its seek list (xdd-worker
        // pairs E2ERole::Source with OpType::Read); a source target configured
        // for anything but a pure read ratio would silently starve its own
        // dispatch loop of sendable data.
        if e2e.role == E2ERole::Source && target.rwratio != 1.0 {
            return Err(Error::Validation { target: name(), message: "an E2E source target must have rwratio = 1.0 (pure read)".into() });
        }
    }

    if let Some(restart) = &target.restart {
        if target.e2e.is_none() {
            return Err(Error::Validation { target: name(), message: "restart is only meaningful for an E2E target".into() });
        }
        if restart.resume && !restart.path.exists() {
            tracing::warn!(target = %target.name, path = %restart.path.display(), "resume requested but restart file does not exist yet; starting from the beginning");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdd_types::config::{OrderingMode, SeekPattern, Throttle};

    fn base() -> TargetConfig {
        TargetConfig {
            name: "t0".into(),
            path: "/dev/null".into(),
            reqsize: 1,
            block_size: 4096,
            queue_depth: 1,
            rwratio: 1.0,
            start_offset: 0,
            pass_offset: 0,
            numreqs: Some(1),
            total_bytes: None,
            seek: SeekPattern::Sequential { range: None },
            throttle: Throttle::None,
            ordering: OrderingMode::None,
            e2e: None,
            restart: None,
            direct_io: false,
            max_errors: 0,
            stop_on_error: false,
            timestamp: None,
            processor_pin: None,
        }
    }

    #[test]
    fn rejects_both_numreqs_and_total_bytes() {
        let mut t = base();
        t.total_bytes = Some(4096);
        let run = RunConfig { run_id: "r".into(), passes: 1, pass_delay: Default::default(), gts_delta_ns: 0, targets: vec![t] };
        assert!(validate_run(&run).is_err());
    }

    #[test]
    fn rejects_neither_numreqs_nor_total_bytes() {
        let mut t = base();
        t.numreqs = None;
        let run = RunConfig { run_id: "r".into(), passes: 1, pass_delay: Default::default(), gts_delta_ns: 0, targets: vec![t] };
        assert!(validate_run(&run).is_err());
    }

    #[test]
    fn accepts_a_well_formed_single_target_run() {
        let run = RunConfig { run_id: "r".into(), passes: 1, pass_delay: Default::default(), gts_delta_ns: 0, targets: vec![base()] };
        assert!(validate_run(&run).is_ok());
    }

    #[test]
    fn rejects_duplicate_target_names() {
        let run = RunConfig { run_id: "r".into(), passes: 1, pass_delay: Default::default(), gts_delta_ns: 0, targets: vec![base(), base()] };
        assert!(validate_run(&run).is_err());
    }
}
