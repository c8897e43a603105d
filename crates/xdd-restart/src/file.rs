// SPDX-License-Identifier: Apache-2.0

//! Text, line-oriented key=value restart file (spec.md §6 "Restart file").

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use xdd_types::restart::{RestartFlags, RestartRecord};

use crate::error::Error;

pub fn write(record: &RestartRecord, path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");

    let mut body = String::new();
    body.push_str(&format!("source_host={}\n", record.source_host));
    body.push_str(&format!("source_path={}\n", record.source_path));
    body.push_str(&format!("destination_host={}\n", record.destination_host));
    body.push_str(&format!("destination_path={}\n", record.destination_path));
    body.push_str(&format!("low_byte_offset={}\n", record.low_byte_offset));
    body.push_str(&format!("high_byte_offset={}\n", record.high_byte_offset));
    body.push_str(&format!("last_committed_byte_location={}\n", record.last_committed_byte_location));
    body.push_str(&format!("last_committed_length={}\n", record.last_committed_length));
    body.push_str(&format!("last_update_time={}\n", record.last_update_time));
    body.push_str(&format!("flags={}\n", record.flags.bits()));

    {
        let mut file = File::create(&tmp_path).map_err(|source| io_err(&tmp_path, source))?;
        file.write_all(body.as_bytes()).map_err(|source| io_err(&tmp_path, source))?;
        file.sync_all().map_err(|source| io_err(&tmp_path, source))?;
    }
    fs::rename(&tmp_path, path).map_err(|source| io_err(path, source))?;
    Ok(())
}

pub fn read(path: impl AsRef<Path>) -> Result<RestartRecord, Error> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| io_err(path, source))?;
    let reader = BufReader::new(file);

    let mut kv = std::collections::HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|source| io_err(path, source))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            kv.insert(k.to_string(), v.to_string());
        }
    }

    let get = |key: &'static str| -> Result<String, Error> {
        kv.get(key).cloned().ok_or(Error::MissingKey { path: path.display().to_string(), key })
    };
    let get_u64 = |key: &'static str, kv: &std::collections::HashMap<String, String>| -> Result<u64, Error> {
        let raw = kv.get(key).cloned().ok_or(Error::MissingKey { path: path.display().to_string(), key })?;
        raw.parse::<u64>().map_err(|_| Error::MalformedValue { path: path.display().to_string(), key, value: raw })
    };

    let flags_raw = get("flags")?;
    let flags_bits = flags_raw
        .parse::<u64>()
        .map_err(|_| Error::MalformedValue { path: path.display().to_string(), key: "flags", value: flags_raw.clone() })?;

    Ok(RestartRecord {
        source_host: get("source_host")?,
        source_path: get("source_path")?,
        destination_host: get("destination_host")?,
        destination_path: get("destination_path")?,
        low_byte_offset: get_u64("low_byte_offset", &kv)?,
        high_byte_offset: get_u64("high_byte_offset", &kv)?,
        last_committed_byte_location: get_u64("last_committed_byte_location", &kv)?,
        last_committed_length: get_u64("last_committed_length", &kv)?,
        last_update_time: get_u64("last_update_time", &kv)?,
        flags: RestartFlags::from_bits_truncate(flags_bits),
    })
}

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io { path: path.display().to_string(), source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.txt");

        let mut record = RestartRecord::new("src-host".into(), "/data/a".into(), "dst-host".into(), "/data/b".into());
        record.last_committed_byte_location = 512 * 1024 * 1024;
        record.last_committed_length = 65536;
        record.flags = RestartFlags::IS_SOURCE | RestartFlags::RESUME_COPY;

        write(&record, &path).unwrap();
        let loaded = read(&path).unwrap();

        assert_eq!(loaded.source_host, "src-host");
        assert_eq!(loaded.last_committed_byte_location, 512 * 1024 * 1024);
        assert!(loaded.flags.contains(RestartFlags::IS_SOURCE));
        assert!(loaded.flags.contains(RestartFlags::RESUME_COPY));
        assert!(!loaded.flags.contains(RestartFlags::SUCCESSFUL_COMPLETION));
    }

    #[test]
    fn missing_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        fs::write(&path, "source_host=h\n").unwrap();
        let err = read(&path).unwrap_err();
        assert!(matches!(err, Error::MissingKey { .. }));
    }
}
