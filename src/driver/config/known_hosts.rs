// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The on-disk store backing trust-on-first-use encryption.
//!
//! File layout: one record per line, `address<SPACE>fingerprint-hex`.
//! Lines starting with `#` are comments, blank lines are ignored, duplicate
//! records are tolerated (the first one wins).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::warn;

#[derive(Debug)]
pub(crate) struct KnownHosts {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl KnownHosts {
    /// Load the file, creating in-memory state only; a missing file is the
    /// same as an empty one.
    pub(crate) fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self { path, entries });
            }
            Err(err) => return Err(err),
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((address, fingerprint)) = line.split_once(' ') else {
                warn!("ignoring malformed known hosts line: {line:?}");
                continue;
            };
            entries
                .entry(address.to_string())
                .or_insert_with(|| fingerprint.to_string());
        }
        Ok(Self { path, entries })
    }

    pub(crate) fn get(&self, address: &str) -> Option<&str> {
        self.entries.get(address).map(String::as_str)
    }

    /// Record a first-seen fingerprint and append it to the file.
    pub(crate) fn insert(&mut self, address: &str, fingerprint: &str) -> io::Result<()> {
        self.entries
            .insert(address.to_string(), fingerprint.to_string());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {}", address, fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use super::*;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let mut path = env::temp_dir();
        path.push(format!("graphbolt-known-hosts-{}-{}", std::process::id(), name));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load() {
        let path = temp_file(
            "load",
            "# trusted servers\n\
             \n\
             host1:7687 aa01\n\
             host2:7687 bb02\n",
        );
        let known_hosts = KnownHosts::load(&path).unwrap();
        assert_eq!(known_hosts.get("host1:7687"), Some("aa01"));
        assert_eq!(known_hosts.get("host2:7687"), Some("bb02"));
        assert_eq!(known_hosts.get("host3:7687"), None);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_duplicates_tolerated_first_wins() {
        let path = temp_file("duplicates", "host1:7687 aa01\nhost1:7687 bb02\n");
        let known_hosts = KnownHosts::load(&path).unwrap();
        assert_eq!(known_hosts.get("host1:7687"), Some("aa01"));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty() {
        let mut path = env::temp_dir();
        path.push("graphbolt-known-hosts-does-not-exist");
        let known_hosts = KnownHosts::load(&path).unwrap();
        assert_eq!(known_hosts.get("host1:7687"), None);
    }

    #[test]
    fn test_insert_appends() {
        let path = temp_file("insert", "# comment\n");
        let mut known_hosts = KnownHosts::load(&path).unwrap();
        known_hosts.insert("host1:7687", "aa01").unwrap();

        let reloaded = KnownHosts::load(&path).unwrap();
        assert_eq!(reloaded.get("host1:7687"), Some("aa01"));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# comment\n"));
        fs::remove_file(path).unwrap();
    }
}
