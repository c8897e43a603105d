// SPDX-License-Identifier: Apache-2.0

//! Minimal YAML loader (spec.md §1 "Out of scope: config-file loading" is
//! about the general-purpose surface; this is the thin on-ramp the engine
//! needs to be runnable standalone, analogous to the teacher's
//! `otap_df_config::pipeline_group::from_file`).

use std::path::Path;

use crate::error::Error;
use crate::model::{RunConfig, RunConfigFile};
use crate::validate::validate_run;

pub fn load_yaml(path: impl AsRef<Path>) -> Result<RunConfig, Error> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| Error::Read { path: path.display().to_string(), source })?;
    parse_yaml(&text)
}

pub fn parse_yaml(text: &str) -> Result<RunConfig, Error> {
    let file: RunConfigFile = serde_yaml::from_str(text).map_err(|source| Error::Parse { path: "<string>".into(), source })?;
    let run = file.into_run_config()?;
    validate_run(&run)?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_single_target_run() {
        let yaml = r#"
run_id: smoke
passes: 1
targets:
  - name: t0
    path: /tmp/xdd-smoke.bin
    reqsize: 256
    block_size: "4 KiB"
    queue_depth: 4
    rwratio: 1.0
    numreqs: 1024
    seek:
      pattern: sequential
      range: null
"#;
        let run = parse_yaml(yaml).unwrap();
        assert_eq!(run.run_id, "smoke");
        assert_eq!(run.targets.len(), 1);
        assert_eq!(run.targets[0].block_size, 4096);
        assert_eq!(run.targets[0].iosize(), 256 * 4096);
    }

    #[test]
    fn rejects_a_run_with_no_targets() {
        let yaml = "run_id: empty\ntargets: []\n";
        assert!(parse_yaml(yaml).is_err());
    }
}
